//! Bully election state machine
//!
//! Pure bookkeeping, no IO: the node feeds inbound messages and timer
//! expirations in, and acts on what comes back out ([`Reaction`],
//! [`RoundOutcome`]).
use bully_api::{Message, MessageKind, NodeId};

/// What the node is doing with respect to leadership
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// No election running; the leader may or may not be known
    Idle,
    /// Challenged all higher identities and collecting `OK`s
    Electing,
    /// Got an `OK` from a higher process and waiting for its `LEADER`
    AwaitingAnnouncement,
    /// This node is the leader
    Leader,
}

/// What the node should send in response to an inbound message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reaction {
    None,
    /// Reply `OK` to an `ELECTION`, and if `join_election` start our own
    /// round (after a short delay)
    ReplyOk { to: NodeId, join_election: bool },
    /// We're the leader and got challenged: answer with a direct `LEADER`
    /// to the challenger, and never with `OK`
    ///
    /// Plain Bully has the leader stay silent here. A process started after
    /// the startup announcement doesn't know the leader, so it challenges
    /// everyone above it; if the leader stayed silent, the challenger (or
    /// someone between it and the leader) would declare itself, and the
    /// leader would then adopt that announcement. Answering with `LEADER`
    /// keeps the highest live process in charge.
    ReassertLeadership { to: NodeId },
}

/// How a round ended once the response window closed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Nobody higher answered; we are the leader now and must announce it
    SelfElected,
    /// A higher process answered; wait for its announcement
    Yielded,
    /// An announcement arrived while we were still collecting responses
    Adopted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectionState {
    id: NodeId,
    /// Most recently announced leader
    leader_id: Option<NodeId>,
    election_in_progress: bool,
    awaiting_responses: bool,
    received_response: bool,
}

impl ElectionState {
    /// Initial state of process `id` in a cluster with highest identity `max_id`
    ///
    /// The highest identity starts out as the leader, without an election.
    pub fn new(id: NodeId, max_id: NodeId) -> Self {
        Self {
            id,
            leader_id: (id == max_id).then_some(id),
            election_in_progress: false,
            awaiting_responses: false,
            received_response: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn is_leader(&self) -> bool {
        self.leader_id == Some(self.id)
    }

    pub fn is_election_in_progress(&self) -> bool {
        self.election_in_progress
    }

    pub fn has_received_response(&self) -> bool {
        self.received_response
    }

    pub fn role(&self) -> Role {
        if self.election_in_progress {
            if self.awaiting_responses {
                Role::Electing
            } else {
                Role::AwaitingAnnouncement
            }
        } else if self.is_leader() {
            Role::Leader
        } else {
            Role::Idle
        }
    }

    /// Start a new round, unless one is already running
    ///
    /// Returns `false` (and changes nothing) if a round is in progress.
    pub fn start_round(&mut self) -> bool {
        if self.election_in_progress {
            return false;
        }
        self.election_in_progress = true;
        self.reset_round();
        true
    }

    /// The window for `OK` responses is over: decide the round
    pub fn close_response_window(&mut self) -> RoundOutcome {
        self.awaiting_responses = false;

        if !self.election_in_progress {
            RoundOutcome::Adopted
        } else if self.received_response {
            RoundOutcome::Yielded
        } else {
            self.leader_id = Some(self.id);
            self.election_in_progress = false;
            RoundOutcome::SelfElected
        }
    }

    /// No announcement came after yielding: start the round over
    ///
    /// Returns `false` if an announcement landed in the meantime and there's
    /// nothing to retry. The in-progress flag stays set throughout, so no
    /// other initiation can sneak in between the rounds.
    pub fn retry_round(&mut self) -> bool {
        if !self.election_in_progress {
            return false;
        }
        self.reset_round();
        true
    }

    fn reset_round(&mut self) {
        self.awaiting_responses = true;
        self.received_response = false;
    }

    /// Apply an inbound message
    pub fn handle(&mut self, msg: Message) -> Reaction {
        match msg.kind {
            MessageKind::Election => {
                if self.is_leader() {
                    Reaction::ReassertLeadership { to: msg.sender }
                } else {
                    Reaction::ReplyOk {
                        to: msg.sender,
                        join_election: !self.election_in_progress,
                    }
                }
            }
            MessageKind::Ok => {
                self.received_response = true;
                Reaction::None
            }
            MessageKind::Leader => {
                // last announcement wins, there are no terms to compare
                self.leader_id = Some(msg.sender);
                self.election_in_progress = false;
                self.awaiting_responses = false;
                self.received_response = false;
                Reaction::None
            }
            MessageKind::Ping => Reaction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: u8, kind: MessageKind) -> Message {
        Message::new(NodeId(sender), kind)
    }

    #[test]
    fn initial_state() {
        let follower = ElectionState::new(NodeId(2), NodeId(3));
        assert_eq!(follower.leader_id(), None);
        assert_eq!(follower.role(), Role::Idle);

        let leader = ElectionState::new(NodeId(3), NodeId(3));
        assert_eq!(leader.leader_id(), Some(NodeId(3)));
        assert_eq!(leader.role(), Role::Leader);
    }

    #[test]
    fn start_round_is_idempotent() {
        let mut state = ElectionState::new(NodeId(1), NodeId(3));
        assert!(state.start_round());
        assert_eq!(state.role(), Role::Electing);

        state.handle(msg(2, MessageKind::Ok));
        let before = state.clone();
        assert!(!state.start_round());
        assert_eq!(state, before);
    }

    #[test]
    fn no_response_means_self_election() {
        let mut state = ElectionState::new(NodeId(2), NodeId(3));
        state.start_round();

        assert_eq!(state.close_response_window(), RoundOutcome::SelfElected);
        assert_eq!(state.leader_id(), Some(NodeId(2)));
        assert_eq!(state.role(), Role::Leader);
        assert!(!state.is_election_in_progress());
    }

    #[test]
    fn response_means_yield_until_announcement() {
        let mut state = ElectionState::new(NodeId(1), NodeId(3));
        state.start_round();
        assert_eq!(state.handle(msg(2, MessageKind::Ok)), Reaction::None);
        assert!(state.has_received_response());

        assert_eq!(state.close_response_window(), RoundOutcome::Yielded);
        assert_eq!(state.role(), Role::AwaitingAnnouncement);

        state.handle(msg(2, MessageKind::Leader));
        assert_eq!(state.role(), Role::Idle);
        assert_eq!(state.leader_id(), Some(NodeId(2)));
        assert!(!state.retry_round());
    }

    #[test]
    fn missing_announcement_retries() {
        let mut state = ElectionState::new(NodeId(1), NodeId(3));
        state.start_round();
        state.handle(msg(3, MessageKind::Ok));
        state.close_response_window();

        assert!(state.retry_round());
        assert_eq!(state.role(), Role::Electing);
        assert!(!state.has_received_response());
    }

    #[test]
    fn announcement_during_response_window_is_adopted() {
        let mut state = ElectionState::new(NodeId(1), NodeId(3));
        state.start_round();
        state.handle(msg(3, MessageKind::Leader));

        assert_eq!(state.close_response_window(), RoundOutcome::Adopted);
        assert_eq!(state.leader_id(), Some(NodeId(3)));
        assert_eq!(state.role(), Role::Idle);
    }

    #[test]
    fn election_message_handling() {
        let mut idle = ElectionState::new(NodeId(2), NodeId(3));
        assert_eq!(
            idle.handle(msg(1, MessageKind::Election)),
            Reaction::ReplyOk {
                to: NodeId(1),
                join_election: true
            }
        );

        idle.start_round();
        assert_eq!(
            idle.handle(msg(1, MessageKind::Election)),
            Reaction::ReplyOk {
                to: NodeId(1),
                join_election: false
            }
        );
    }

    #[test]
    fn leader_never_replies_ok() {
        let mut leader = ElectionState::new(NodeId(3), NodeId(3));
        let reaction = leader.handle(msg(1, MessageKind::Election));

        assert_eq!(reaction, Reaction::ReassertLeadership { to: NodeId(1) });
        assert_eq!(leader.role(), Role::Leader);
    }

    #[test]
    fn last_announcement_wins() {
        let mut state = ElectionState::new(NodeId(3), NodeId(3));
        state.handle(msg(2, MessageKind::Leader));
        assert_eq!(state.leader_id(), Some(NodeId(2)));
        assert_eq!(state.role(), Role::Idle);

        state.handle(msg(1, MessageKind::Leader));
        assert_eq!(state.leader_id(), Some(NodeId(1)));
    }

    #[test]
    fn ping_changes_nothing() {
        let mut state = ElectionState::new(NodeId(3), NodeId(3));
        let before = state.clone();
        assert_eq!(state.handle(msg(1, MessageKind::Ping)), Reaction::None);
        assert_eq!(state, before);
    }
}
