//! # netbed-network
//!
//! Kernel networking primitives for netbed.
//!
//! This crate wraps the two pieces of host state the wiring engine drives:
//! the kernel device table (over rtnetlink) and the named network namespace
//! registry. Both sit behind traits so the engine can be exercised without
//! root.

#![warn(missing_docs)]

pub mod bridge;
pub mod netlink;
pub mod netns;

pub use bridge::disable_bridge_netfilter;
pub use netlink::{LinkScope, NetworkControl, RtnetlinkControl};
pub use netns::{FsNamespaceRegistry, NamespaceHandle, NamespaceRegistry};
