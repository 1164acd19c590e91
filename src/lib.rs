#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod config;
mod context;
pub mod engine;
mod error;
mod executor;
#[cfg(feature = "logging")]
pub mod logging;
mod node;
#[cfg(test)]
mod testing;

pub use crate::blueprint::{Blueprint, Link, NodeHandle};
pub use crate::config::{Config, DEFAULT_MAX_DEPTH};
pub use crate::context::Context;
pub use crate::engine::{
    Connector, Direction, Execution, IdGenerator, Links, Port, PortSpec, Ports, RandomIds, Runner,
    RunnerId, SequentialIds, SharedRunner, Unwired, Wiring,
};
pub use crate::error::*;
pub use crate::executor::{Diagnostics, Pipeline};
pub use crate::node::{Node, NodeInfo};
