use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bully_api::{Message, MessageKind, NodeId, ParseError, MAX_MESSAGE_SIZE};
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, trace};

use crate::{election::Reaction, task::AutoJoinHandle};

use super::{leader_monitor::LeaderMonitor, NodeShared};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("timeout")]
    Timeout,
    #[error("invalid message: {0}")]
    Parse(#[from] ParseError),
    #[error("message from outside of the cluster: {0}")]
    UnknownSender(NodeId),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Owns the thread and the runtime all the peer traffic happens on
///
/// Inbound: accepting connections and feeding messages into the election
/// state. Outbound: the leader monitor and election rounds, spawned on the
/// same runtime.
pub struct PeerHandler {
    #[allow(unused)]
    join_handle: AutoJoinHandle,
}

impl PeerHandler {
    pub fn new(
        shared: Arc<NodeShared>,
        rt: tokio::runtime::Runtime,
        listen_addr: SocketAddr,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = flume::bounded(1);

        let join_handle = AutoJoinHandle::spawn("bully-peer", move || {
            let _guard = scopeguard::guard((), |_| {
                info!("PeerHandler is done");
            });

            rt.block_on(async {
                let listener = match TcpListener::bind(listen_addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                match listener.local_addr() {
                    Ok(addr) => info!(%addr, "Listening for peers"),
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
                let _ = tx.send(Ok(()));

                tokio::spawn({
                    let monitor = LeaderMonitor::new(shared.clone());
                    let guard = shared.panic_guard("leader-monitor");
                    async move {
                        monitor.run().await;
                        guard.done();
                    }
                });

                if shared.election_state().is_leader() {
                    let shared = shared.clone();
                    tokio::spawn(async move { shared.announce_leadership().await });
                }

                (PeerHandlerIngress { shared }).run(listener).await;
            });

            info!("Waiting for PeerHandler to complete all connections...");
            rt.shutdown_timeout(Duration::from_secs(1));
        })?;

        rx.recv()??;

        Ok(Self { join_handle })
    }
}

pub struct PeerHandlerIngress {
    shared: Arc<NodeShared>,
}

impl PeerHandlerIngress {
    async fn run(&self, listener: TcpListener) {
        let accept_poll = self.shared.params.timeouts.accept_poll;

        while !self.shared.is_node_shutting_down() {
            let (mut stream, peer_addr) =
                // bound by a timeout, so we can exit after `is_node_shutting_down` is set in a reasonable time
                match timeout(accept_poll, listener.accept()).await {
                    Ok(Ok(o)) => o,
                    Ok(Err(e)) => {
                        error!(%e, "peer listener accept error");
                        sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                    Err(_) => {
                        // just a timeout
                        continue;
                    }
                };

            trace!(%peer_addr, "New peer connection");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(&shared, &mut stream).await {
                    debug!(%peer_addr, error = %e, "Discarding message");
                }
            });
        }
    }

    async fn handle_connection(
        shared: &Arc<NodeShared>,
        stream: &mut TcpStream,
    ) -> ConnectionResult<()> {
        let msg = timeout(shared.params.timeouts.send, Self::read_message(stream))
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        if !shared.params.peers.contains(msg.sender) || msg.sender == shared.id() {
            return Err(ConnectionError::UnknownSender(msg.sender));
        }

        Self::dispatch(shared, msg).await;
        Ok(())
    }

    /// Read the whole connection payload (up to one byte past the limit, to detect overflows)
    async fn read_message(stream: &mut TcpStream) -> ConnectionResult<Message> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE + 1];
        let mut len = 0;

        while len < buf.len() {
            let read = stream.read(&mut buf[len..]).await?;
            if read == 0 {
                break;
            }
            len += read;
        }

        Ok(Message::decode(&buf[..len])?)
    }

    async fn dispatch(shared: &Arc<NodeShared>, msg: Message) {
        match msg.kind {
            MessageKind::Election => info!(from = %msg.sender, "Received ELECTION"),
            MessageKind::Ok => info!(from = %msg.sender, "Received OK"),
            MessageKind::Leader => info!(leader = %msg.sender, "New leader announced"),
            MessageKind::Ping => trace!(from = %msg.sender, "Received PING"),
        }

        let mut reaction = Reaction::None;
        shared
            .election_tx
            .send_modify(|state| reaction = state.handle(msg));

        match reaction {
            Reaction::None => {}
            Reaction::ReplyOk { to, join_election } => {
                shared.transport.send(to, MessageKind::Ok).await;
                if join_election {
                    shared.initiate_election_deferred();
                }
            }
            Reaction::ReassertLeadership { to } => {
                info!(challenger = %to, "Already the leader, ignoring ELECTION");
                shared.transport.send(to, MessageKind::Leader).await;
            }
        }
    }
}
