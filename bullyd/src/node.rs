mod elector;
mod leader_monitor;
mod peer_handler;

use crate::election::{ElectionState, Role};
use crate::node::elector::Elector;
use crate::node::peer_handler::PeerHandler;
use crate::task::PanicGuard;
use crate::transport::Transport;
use bully_api::{MessageKind, NodeId, PeerDirectory};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

/// Protocol timing, all derived from a single time unit by default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on connecting to a peer and handing it a message
    pub send: Duration,
    /// How long an electing node waits for `OK`s
    pub response: Duration,
    /// How long a node that got an `OK` waits for the `LEADER` announcement
    pub announcement: Duration,
    /// Period of the leader liveness probe
    pub probe_period: Duration,
    /// Delay before a node that answered an `ELECTION` starts its own
    pub election_defer: Duration,
    /// Bound on a single `accept`, so shutdown is noticed in time
    pub accept_poll: Duration,
    /// Base backoff before retrying a round that got no announcement
    pub retry_backoff: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Timeouts {
    pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

    /// Timeouts for [`Self::DEFAULT_TIME_UNIT`]
    pub const DEFAULT: Timeouts = Timeouts {
        send: Duration::from_secs(1),
        response: Duration::from_secs(3),
        announcement: Duration::from_secs(5),
        probe_period: Duration::from_secs(5),
        election_defer: Duration::from_secs(1),
        accept_poll: Duration::from_millis(500),
        retry_backoff: Duration::from_secs(1),
    };

    /// Derive all timeouts from one time unit
    ///
    /// Fails if the unit is so short some timeout would be zero, or so long
    /// some timeout can't be represented.
    pub fn from_time_unit(unit: Duration) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTimeUnit(unit);
        let timeouts = Self {
            send: unit,
            response: unit.checked_mul(3).ok_or_else(invalid)?,
            announcement: unit.checked_mul(5).ok_or_else(invalid)?,
            probe_period: unit.checked_mul(5).ok_or_else(invalid)?,
            election_defer: unit,
            accept_poll: unit / 2,
            retry_backoff: unit,
        };
        if timeouts.has_zero() {
            return Err(invalid());
        }
        Ok(timeouts)
    }

    /// A zero timeout would turn the loops it bounds into busy loops
    pub fn has_zero(&self) -> bool {
        [
            self.send,
            self.response,
            self.announcement,
            self.probe_period,
            self.election_defer,
            self.accept_poll,
            self.retry_backoff,
        ]
        .iter()
        .any(Duration::is_zero)
    }

    /// Backoff before retrying after `round` failed, doubling each round up
    /// to the announcement timeout
    pub fn retry_backoff(&self, round: u32) -> Duration {
        let factor = 1u32
            .checked_shl(round.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.announcement)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cluster must have at least one process")]
    EmptyCluster,
    #[error("process id {id} is outside of 1..={max_id}")]
    InvalidId { id: NodeId, max_id: NodeId },
    #[error("base port {base_port} can't fit {max_id} processes")]
    PortOutOfRange { base_port: u16, max_id: NodeId },
    #[error("invalid time unit: {0:?}")]
    InvalidTimeUnit(Duration),
    #[error("timeouts must be non-zero")]
    ZeroTimeout,
}

/// Runtime parameters of a node
#[derive(TypedBuilder, Debug, Clone)]
pub struct Parameters {
    /// Our own identity
    pub id: NodeId,

    #[builder(default)]
    pub peers: PeerDirectory,

    #[builder(default)]
    pub timeouts: Timeouts,
}

impl Parameters {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_id = self.peers.max_id();
        if max_id == NodeId(0) {
            return Err(ConfigError::EmptyCluster);
        }
        if !self.peers.contains(self.id) {
            return Err(ConfigError::InvalidId {
                id: self.id,
                max_id,
            });
        }
        if !self.peers.fits_port_range() {
            return Err(ConfigError::PortOutOfRange {
                base_port: self.peers.base_port(),
                max_id,
            });
        }
        if self.timeouts.has_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Address this node listens on
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.validate()?;
        self.peers.addr(self.id).ok_or(ConfigError::InvalidId {
            id: self.id,
            max_id: self.peers.max_id(),
        })
    }
}

pub struct NodeShared {
    params: Parameters,

    is_node_shutting_down: Arc<AtomicBool>,

    transport: Transport,

    /// Handle to the runtime driving all the node's tasks
    runtime: tokio::runtime::Handle,

    /// Election state; every transition goes through the sender so waiters
    /// get notified
    election_tx: watch::Sender<ElectionState>,
}

impl NodeShared {
    pub fn id(&self) -> NodeId {
        self.params.id
    }

    pub fn panic_guard(&self, name: &'static str) -> PanicGuard {
        PanicGuard::new(name, self.is_node_shutting_down.clone())
    }

    pub fn is_node_shutting_down(&self) -> bool {
        self.is_node_shutting_down.load(Ordering::SeqCst)
    }

    /// Snapshot of the current election state
    pub fn election_state(&self) -> ElectionState {
        self.election_tx.borrow().clone()
    }

    /// Start an election round in the background, unless one is already running
    pub fn initiate_election(self: &Arc<Self>) {
        let mut started = false;
        self.election_tx.send_if_modified(|state| {
            started = state.start_round();
            started
        });

        if !started {
            debug!("Election already in progress");
            return;
        }

        let elector = Elector::new(self.clone());
        let guard = self.panic_guard("elector");
        self.runtime.spawn(async move {
            elector.run().await;
            guard.done();
        });
    }

    /// Like [`Self::initiate_election`], but after `Timeouts::election_defer`
    pub fn initiate_election_deferred(self: &Arc<Self>) {
        let shared = self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(shared.params.timeouts.election_defer).await;
            shared.initiate_election();
        });
    }

    /// Tell every peer we're the leader
    pub async fn announce_leadership(&self) {
        info!(id = %self.id(), "Announcing leadership");
        self.transport.broadcast(MessageKind::Leader).await;
    }
}

/// Handle to control and observe a running [`Node`]
#[derive(Clone)]
pub struct NodeCtrl {
    shared: Arc<NodeShared>,
}

impl NodeCtrl {
    pub fn id(&self) -> NodeId {
        self.shared.id()
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.shared.election_state().leader_id()
    }

    pub fn role(&self) -> Role {
        self.shared.election_state().role()
    }

    pub fn election_state(&self) -> ElectionState {
        self.shared.election_state()
    }

    pub fn initiate_election(&self) {
        self.shared.initiate_election();
    }

    pub fn stop(&self) {
        self.shared.is_node_shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn install_signal_handler(&self) -> anyhow::Result<()> {
        debug!("Installing signal handler");
        for sig in TERM_SIGNALS {
            trace!(sig, "Installing signal handler");
            flag::register(*sig, Arc::clone(&self.shared.is_node_shutting_down))?;
        }
        Ok(())
    }
}

pub struct Node {
    shared: Arc<NodeShared>,
    stop_on_drop: bool,
    /// Thread running the listener, the leader monitor and elections
    #[allow(unused)]
    peer_handler: PeerHandler,
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.stop_on_drop {
            self.shared.is_node_shutting_down.store(true, Ordering::SeqCst);
        }
    }
}

impl Node {
    pub fn new(params: Parameters) -> anyhow::Result<Self> {
        let listen_addr = params.listen_addr()?;

        info!(
            id = %params.id,
            max_id = %params.peers.max_id(),
            listen = %listen_addr,
            "Starting bullyd"
        );

        let rt = tokio::runtime::Runtime::new()?;
        let is_node_shutting_down = Arc::new(AtomicBool::new(false));
        let (election_tx, _) =
            watch::channel(ElectionState::new(params.id, params.peers.max_id()));

        let shared = Arc::new(NodeShared {
            transport: Transport::new(params.id, params.peers, params.timeouts.send),
            runtime: rt.handle().clone(),
            is_node_shutting_down,
            election_tx,
            params,
        });

        let peer_handler = PeerHandler::new(shared.clone(), rt, listen_addr)?;

        Ok(Node {
            shared,
            stop_on_drop: true,
            peer_handler,
        })
    }

    pub fn get_ctrl(&self) -> NodeCtrl {
        NodeCtrl {
            shared: self.shared.clone(),
        }
    }

    /// Block until the node is stopped
    pub fn wait(mut self) {
        self.stop_on_drop = false;
        drop(self);
        info!("Node finished");
    }
}
