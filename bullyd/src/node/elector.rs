use std::sync::Arc;

use bully_api::MessageKind;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::election::RoundOutcome;

use super::NodeShared;

/// Drives an election started by [`NodeShared::initiate_election`] to completion
///
/// Rounds repeat for as long as some higher process answers `OK` but then
/// never announces itself.
pub struct Elector {
    shared: Arc<NodeShared>,
}

impl Elector {
    pub fn new(shared: Arc<NodeShared>) -> Self {
        Self { shared }
    }

    pub async fn run(self) {
        let timeouts = self.shared.params.timeouts;
        let mut election_rx = self.shared.election_tx.subscribe();
        let mut round: u32 = 1;

        loop {
            info!(id = %self.shared.id(), round, "Starting election");
            let reached = self
                .shared
                .transport
                .send_to_higher(MessageKind::Election)
                .await;
            debug!(round, reached, "Sent ELECTION to higher peers");

            // either an `OK`, or an announcement that ends the election for us
            let _ = timeout(
                timeouts.response,
                election_rx.wait_for(|state| {
                    state.has_received_response() || !state.is_election_in_progress()
                }),
            )
            .await;

            let mut outcome = RoundOutcome::Adopted;
            self.shared
                .election_tx
                .send_modify(|state| outcome = state.close_response_window());

            match outcome {
                RoundOutcome::SelfElected => {
                    info!(round, "No response from higher peers, declaring self the leader");
                    self.shared.announce_leadership().await;
                    return;
                }
                RoundOutcome::Adopted => {
                    info!(
                        round,
                        leader = ?self.shared.election_state().leader_id(),
                        "Leader announced during election"
                    );
                    return;
                }
                RoundOutcome::Yielded => {
                    info!(round, "Higher peer responded, waiting for the leader announcement");
                }
            }

            let announced = timeout(
                timeouts.announcement,
                election_rx.wait_for(|state| !state.is_election_in_progress()),
            )
            .await
            .is_ok();

            if announced || self.shared.is_node_shutting_down() {
                return;
            }

            let backoff = timeouts.retry_backoff(round);
            warn!(round, ?backoff, "No leader announced, restarting election");
            sleep(backoff).await;

            let mut retry = false;
            self.shared
                .election_tx
                .send_modify(|state| retry = state.retry_round());
            if !retry {
                debug!(round, "Leader announced during backoff");
                return;
            }

            round = round.saturating_add(1);
        }
    }
}
