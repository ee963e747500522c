use std::sync::Arc;

use bully_api::MessageKind;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use super::NodeShared;

/// Periodically checks the leader is reachable, and starts an election if not
pub struct LeaderMonitor {
    shared: Arc<NodeShared>,
}

impl LeaderMonitor {
    pub fn new(shared: Arc<NodeShared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        let probe_period = self.shared.params.timeouts.probe_period;

        while !self.shared.is_node_shutting_down() {
            sleep(probe_period).await;

            let state = self.shared.election_state();
            if state.is_leader() {
                continue;
            }

            match state.leader_id() {
                Some(leader) => {
                    // connecting at all is the health signal, no reply expected
                    if self.shared.transport.send(leader, MessageKind::Ping).await {
                        trace!(%leader, "Leader is alive");
                        continue;
                    }
                    warn!(%leader, "Failed to contact leader, starting election");
                }
                None if state.is_election_in_progress() => {
                    debug!("Leader unknown, election already in progress");
                    continue;
                }
                None => {
                    info!("Leader unknown, starting election");
                }
            }

            self.shared.initiate_election();
        }
    }
}
