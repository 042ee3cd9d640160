//! Provisioning configuration.

use std::path::PathBuf;
use std::time::Duration;

use netbed_common::NetbedPaths;

/// Provisioning configuration options.
#[derive(Debug, Clone)]
pub struct NetbedConfig {
    /// Standard paths.
    pub paths: NetbedPaths,
    /// Deadline for each container runtime or netlink call.
    pub timeout: Duration,
    /// Maximum concurrent operations within a dependency level.
    pub parallelism: usize,
    /// Write `0` to the bridge netfilter sysctl before starting.
    pub disable_bridge_netfilter: bool,
}

impl Default for NetbedConfig {
    fn default() -> Self {
        Self {
            paths: NetbedPaths::new(),
            timeout: Duration::from_secs(30),
            parallelism: 8,
            disable_bridge_netfilter: true,
        }
    }
}

impl NetbedConfig {
    /// Set the namespace registry directory.
    #[must_use]
    pub fn with_netns_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths = NetbedPaths::with_netns_dir(dir);
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set level parallelism. Zero is treated as one.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Leave the bridge netfilter sysctl untouched.
    #[must_use]
    pub const fn keep_bridge_netfilter(mut self) -> Self {
        self.disable_bridge_netfilter = false;
        self
    }
}
