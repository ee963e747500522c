use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::NodeId;

/// Static mapping from process identity to its network address
///
/// There is no discovery: every participant derives the address of
/// process `i` as `host:(base_port + i)`, so all of them must agree
/// on `host`, `base_port` and `max_id` out of band.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PeerDirectory {
    host: IpAddr,
    base_port: u16,
    max_id: NodeId,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_HOST,
            Self::DEFAULT_BASE_PORT,
            Self::DEFAULT_MAX_ID,
        )
    }
}

impl PeerDirectory {
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    pub const DEFAULT_BASE_PORT: u16 = 5000;
    pub const DEFAULT_MAX_ID: NodeId = NodeId(5);

    pub fn new(host: IpAddr, base_port: u16, max_id: NodeId) -> Self {
        Self {
            host,
            base_port,
            max_id,
        }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Highest identity in the cluster (`N`)
    pub fn max_id(&self) -> NodeId {
        self.max_id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        NodeId(1) <= id && id <= self.max_id
    }

    /// Address process `id` listens on, `None` for identities outside the cluster
    /// or ones that don't fit in the port range
    pub fn addr(&self, id: NodeId) -> Option<SocketAddr> {
        if !self.contains(id) {
            return None;
        }
        let port = self.base_port.checked_add(u16::from(id))?;
        Some(SocketAddr::new(self.host, port))
    }

    /// Whether every identity of the cluster maps to a valid port
    pub fn fits_port_range(&self) -> bool {
        self.base_port.checked_add(u16::from(self.max_id)).is_some()
    }

    /// All identities, ascending
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (1..=self.max_id.0).map(NodeId)
    }

    /// Identities strictly greater than `id` - the ones `id` has to challenge in an election
    pub fn higher_than(&self, id: NodeId) -> impl Iterator<Item = NodeId> {
        self.ids().filter(move |other| id < *other)
    }

    /// Every identity except `id`
    pub fn others(&self, id: NodeId) -> impl Iterator<Item = NodeId> {
        self.ids().filter(move |other| id != *other)
    }
}

#[test]
fn peer_directory_addressing() {
    let dir = PeerDirectory::new(PeerDirectory::DEFAULT_HOST, 5000, NodeId(3));

    assert_eq!(dir.addr(NodeId(0)), None);
    assert_eq!(dir.addr(NodeId(4)), None);
    assert_eq!(
        dir.addr(NodeId(2)),
        Some(SocketAddr::from(([127, 0, 0, 1], 5002)))
    );
    assert!(dir.fits_port_range());
    assert!(!PeerDirectory::new(PeerDirectory::DEFAULT_HOST, u16::MAX - 1, NodeId(2))
        .fits_port_range());
}

#[test]
fn peer_directory_iteration() {
    let dir = PeerDirectory::new(PeerDirectory::DEFAULT_HOST, 5000, NodeId(4));

    assert_eq!(
        dir.higher_than(NodeId(2)).collect::<Vec<_>>(),
        [NodeId(3), NodeId(4)]
    );
    assert_eq!(dir.higher_than(NodeId(4)).count(), 0);
    assert_eq!(
        dir.others(NodeId(2)).collect::<Vec<_>>(),
        [NodeId(1), NodeId(3), NodeId(4)]
    );
}
