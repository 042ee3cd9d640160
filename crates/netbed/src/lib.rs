//! # netbed
//!
//! Ephemeral virtual network testbeds on a single Linux host.
//!
//! netbed provides:
//! - A YAML topology of container-backed hosts, bridges and links
//! - Node, bridge and link controllers over Docker and rtnetlink
//! - Dependency-ordered, concurrent start with rollback on failure
//! - Best-effort stop that works from the topology file alone

#![warn(missing_docs)]

pub mod bridge;
pub mod cli;
pub mod config;
pub mod context;
pub mod ledger;
pub mod link;
pub mod node;
pub mod orchestrator;
pub mod runtime;
pub mod spec;
pub mod topology;

pub use config::NetbedConfig;
pub use context::Context;
pub use orchestrator::Orchestrator;
pub use topology::Topology;
