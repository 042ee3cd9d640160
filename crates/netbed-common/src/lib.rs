//! # netbed-common
//!
//! Shared utilities and types for netbed.
//!
//! This crate provides common functionality used across all netbed crates:
//! - The error taxonomy and result alias
//! - Validated network device names
//! - CIDR address parsing
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod cidr;
pub mod error;
pub mod name;
pub mod paths;

pub use cidr::parse_cidr;
pub use error::{ErrorKind, NetbedError, NetbedResult};
pub use ipnet::IpNet;
pub use name::DeviceName;
pub use paths::NetbedPaths;
