#![deny(clippy::as_conversions)]

mod election;
mod node;
mod task;
mod transport;

pub use election::{ElectionState, Role};
pub use node::*;
pub use transport::{Transport, TransportError};
