use std::{io, net::SocketAddr, time::Duration};

use bully_api::{Message, MessageKind, NodeId, PeerDirectory};
use futures::future::join_all;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no such peer: {0}")]
    UnknownPeer(NodeId),
    #[error("timeout")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Outgoing side of the peer-to-peer messaging
///
/// Every message is sent over its own short-lived connection. Failures
/// never propagate: a peer we can't reach in time is simply considered
/// dead, and that's information the protocol acts upon.
#[derive(Debug, Clone)]
pub struct Transport {
    id: NodeId,
    peers: PeerDirectory,
    send_timeout: Duration,
}

impl Transport {
    pub fn new(id: NodeId, peers: PeerDirectory, send_timeout: Duration) -> Self {
        Self {
            id,
            peers,
            send_timeout,
        }
    }

    /// Send `kind` to `target`, returning whether it was delivered to its socket
    pub async fn send(&self, target: NodeId, kind: MessageKind) -> bool {
        match self.try_send(target, kind).await {
            Ok(()) => {
                trace!(%target, %kind, "Sent");
                true
            }
            Err(e) => {
                debug!(%target, %kind, error = %e, "Failed to send");
                false
            }
        }
    }

    /// Send `kind` to every other peer
    ///
    /// Best effort: some peers are expected to be dead, so individual
    /// failures are ignored and nothing is reported back.
    pub async fn broadcast(&self, kind: MessageKind) {
        join_all(self.peers.others(self.id).map(|peer| self.send(peer, kind))).await;
    }

    /// Send `kind` to every peer with a higher identity, returning how many were reached
    pub async fn send_to_higher(&self, kind: MessageKind) -> usize {
        join_all(
            self.peers
                .higher_than(self.id)
                .map(|peer| self.send(peer, kind)),
        )
        .await
        .into_iter()
        .filter(|delivered| *delivered)
        .count()
    }

    async fn try_send(&self, target: NodeId, kind: MessageKind) -> TransportResult<()> {
        let addr = self
            .peers
            .addr(target)
            .ok_or(TransportError::UnknownPeer(target))?;
        let msg = Message::new(self.id, kind);

        timeout(self.send_timeout, Self::write_message(addr, msg))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn write_message(addr: SocketAddr, msg: Message) -> TransportResult<()> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(msg.to_string().as_bytes()).await?;
        // closing our side marks the end of the message
        stream.shutdown().await?;
        Ok(())
    }
}
