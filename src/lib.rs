//! node-retire: cordon and drain a Kubernetes node for decommissioning
//!
//! This crate resolves a node by its hostname label, marks it unschedulable
//! and evicts the pods bound to it, reporting per-pod outcomes.

pub mod cluster;
pub mod config;
pub mod cordon;
pub mod drain;
pub mod error;
pub mod resolver;
pub mod telemetry;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use crate::config::DrainConfig;
pub use crate::error::{Error, Result};
pub use crate::workflow::{retire_node, uncordon_node, RetireReport};
