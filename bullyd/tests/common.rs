#![allow(unused)]

use anyhow::Result;
use bully_api::{NodeId, PeerDirectory};
use bullyd::{ElectionState, Node, NodeCtrl, Parameters, Role, Timeouts};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Short enough to keep the tests fast, long enough for loopback TCP
pub const TIME_UNIT: Duration = Duration::from_millis(100);

/// How long to wait for a cluster to settle
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Addressing of a test cluster; every test should use its own `base_port`
pub struct TestCluster {
    peers: PeerDirectory,
}

impl TestCluster {
    pub fn new(base_port: u16, max_id: u8) -> Self {
        init_logging();
        Self {
            peers: PeerDirectory::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                base_port,
                NodeId(max_id),
            ),
        }
    }

    pub fn params(&self, id: u8) -> Parameters {
        Parameters::builder()
            .id(NodeId(id))
            .peers(self.peers)
            .timeouts(Timeouts::from_time_unit(TIME_UNIT).expect("valid time unit"))
            .build()
    }

    pub fn start(&self, id: u8) -> Result<TestNode> {
        Ok(TestNode {
            node: Some(Node::new(self.params(id))?),
        })
    }

    pub fn addr(&self, id: u8) -> SocketAddr {
        self.peers.addr(NodeId(id)).expect("id within the cluster")
    }
}

pub struct TestNode {
    node: Option<Node>,
}

impl TestNode {
    pub fn ctrl(&self) -> NodeCtrl {
        self.node
            .as_ref()
            .expect("Node was already dropped")
            .get_ctrl()
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.ctrl().leader_id()
    }

    pub fn role(&self) -> Role {
        self.ctrl().role()
    }

    pub fn election_state(&self) -> ElectionState {
        self.ctrl().election_state()
    }

    /// Stop the node and wait for it to release its port
    pub fn stop(self) {
        drop(self)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.ctrl().stop();
        self.node.take();
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

/// Whether every node in `nodes` believes `leader` leads
pub fn all_agree_on(nodes: &[&TestNode], leader: u8) -> bool {
    nodes
        .iter()
        .all(|node| node.leader_id() == Some(NodeId(leader)))
}

/// Deliver a raw payload the way a peer would
pub fn send_raw(addr: SocketAddr, payload: &[u8]) -> io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(1))?;
    stream.write_all(payload)?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}

/// A stand-in for a cluster member that records every message it receives
/// and never answers
pub struct FakePeer {
    messages: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl FakePeer {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let messages = Arc::new(Mutex::new(vec![]));
        let stop = Arc::new(AtomicBool::new(false));

        let join_handle = thread::spawn({
            let messages = messages.clone();
            let stop = stop.clone();
            move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            if let Some(msg) = read_all(stream) {
                                messages.lock().expect("locking failed").push(msg);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => thread::sleep(Duration::from_millis(10)),
                    }
                }
            }
        });

        Ok(Self {
            messages,
            stop,
            join_handle: Some(join_handle),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("locking failed").clone()
    }

    pub fn count(&self, msg: &str) -> usize {
        self.messages().iter().filter(|m| *m == msg).count()
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.join().expect("fake peer thread panicked");
        }
    }
}

fn read_all(mut stream: TcpStream) -> Option<String> {
    stream.set_nonblocking(false).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(1))).ok()?;
    let mut msg = String::new();
    stream.read_to_string(&mut msg).ok()?;
    Some(msg)
}
