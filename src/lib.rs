#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod client;
mod config;
mod error;
mod future;
mod graph;
mod payload;
pub mod plan;
pub mod protocol;
pub mod report;
mod symbols;
mod task;
pub mod tasks;
pub mod transport;
mod utils;

#[cfg(test)]
mod testing;

pub use crate::client::{AsCompleted, Client, Stats, Terminator};
pub use crate::config::{ClientConfig, DEFAULT_PORT};
pub use crate::error::LoomError;
pub use crate::future::{Future, Status};
pub use crate::graph::{TaskGraph, TaskHandle};
pub use crate::payload::{Payload, PayloadKind};
pub use crate::plan::Plan;
pub use crate::symbols::{SymbolId, Symbols};
pub use crate::task::{Input, Policy, RESOURCE_CPUS, ResourceRequest, Task, TaskId, cpu1};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
