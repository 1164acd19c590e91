//! The execution core: ports, connectors and runners.
//!
//! Every node is wrapped by a [`Runner`]. A runner owns the [`Connector`]s
//! feeding its input ports, and processing a runner first triggers those
//! connectors. A connector whose value was not produced yet in the current
//! cycle processes the upstream runner, which triggers *its* connectors in
//! turn, so a single call on a sink pulls the whole dependency chain
//! depth-first.
//!
//! ## Cycles
//!
//! Connectors remember that they already delivered a value, the next
//! trigger in the same cycle is a no-op. [`Runner::reset`] clears these
//! markers; the values held in ports survive the reset, but they become
//! stale and are no longer handed to nodes as current input.

mod connector;
mod identity;
mod port;
mod runner;

use std::any::Any;
use std::sync::Arc;

pub use crate::engine::connector::{Connector, Links, Unwired, Wiring};
pub use crate::engine::identity::{IdGenerator, RandomIds, RunnerId, SequentialIds};
pub use crate::engine::port::{Direction, Port, PortSpec, Ports};
pub use crate::engine::runner::{Execution, Runner, SharedRunner};

/// A type-erased, thread-safe value held by a port.
pub type Dynamic = Arc<dyn Any + Send + Sync>;
