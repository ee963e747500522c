use derive_more::Display;

mod msg;
pub use self::msg::*;

mod peer;
pub use self::peer::*;

/// Identity of a participating process
///
/// Valid identities are `1..=N`, where `N` is the agreed upon
/// size of the cluster (see [`PeerDirectory::max_id`]). Bigger
/// identity wins elections.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct NodeId(pub u8);

impl From<NodeId> for u16 {
    fn from(id: NodeId) -> Self {
        u16::from(id.0)
    }
}

#[test]
fn node_id_ordering() {
    assert!(NodeId(3) > NodeId(2));
    assert_eq!(NodeId(7).to_string(), "7");
}
