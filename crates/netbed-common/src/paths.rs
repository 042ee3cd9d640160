//! Standard filesystem paths for netbed.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default namespace registry directory, shared with `ip netns`.
pub static NETBED_NETNS_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("NETBED_NETNS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/netns"))
});

/// Sysctl controlling whether bridged traffic traverses iptables.
pub const BRIDGE_NF_CALL_IPTABLES: &str = "/proc/sys/net/bridge/bridge-nf-call-iptables";

/// Standard paths used by netbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetbedPaths {
    /// Namespace registry directory (default: /var/run/netns).
    pub netns: PathBuf,
}

impl NetbedPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom namespace registry directory.
    #[must_use]
    pub fn with_netns_dir(netns: impl Into<PathBuf>) -> Self {
        Self {
            netns: netns.into(),
        }
    }

    /// Registry entry for a named namespace.
    #[must_use]
    pub fn netns_entry(&self, name: &str) -> PathBuf {
        self.netns.join(name)
    }

    /// Network namespace of a process.
    #[must_use]
    pub fn proc_netns(pid: u32) -> PathBuf {
        Path::new("/proc").join(pid.to_string()).join("ns/net")
    }
}

impl Default for NetbedPaths {
    fn default() -> Self {
        Self {
            netns: NETBED_NETNS_DIR.clone(),
        }
    }
}
