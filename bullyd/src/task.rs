use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, warn};

/// A thread handle that joins the thread when dropped
pub struct AutoJoinHandle {
    name: &'static str,
    join_handle: Option<JoinHandle<()>>,
}

impl AutoJoinHandle {
    pub fn spawn<F>(name: &'static str, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let join_handle = thread::Builder::new().name(name.to_owned()).spawn(f)?;
        Ok(Self {
            name,
            join_handle: Some(join_handle),
        })
    }
}

impl Drop for AutoJoinHandle {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                error!(task = self.name, "Task thread panicked");
            }
        }
    }
}

/// Stops the node if a task exits without calling [`PanicGuard::done`]
pub struct PanicGuard {
    name: &'static str,
    is_node_shutting_down: Arc<AtomicBool>,
    done: bool,
}

impl PanicGuard {
    pub fn new(name: &'static str, is_node_shutting_down: Arc<AtomicBool>) -> Self {
        Self {
            name,
            is_node_shutting_down,
            done: false,
        }
    }

    pub fn done(mut self) {
        self.done = true;
    }
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if !self.done {
            warn!(task = self.name, "Task panic detected, shutting down the node");
            self.is_node_shutting_down.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn panic_guard_flags_shutdown() {
    let flag = Arc::new(AtomicBool::new(false));

    PanicGuard::new("ok", flag.clone()).done();
    assert!(!flag.load(Ordering::SeqCst));

    drop(PanicGuard::new("dropped", flag.clone()));
    assert!(flag.load(Ordering::SeqCst));
}
