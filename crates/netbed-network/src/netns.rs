//! Named network namespace registry.
//!
//! A registry maps a node name to the network namespace of its container so
//! later steps can address the namespace by name. The filesystem registry
//! uses the same layout as `ip netns`: one entry per name under
//! `/var/run/netns`, here a symlink to `/proc/<pid>/ns/net`.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use netbed_common::{NetbedError, NetbedPaths, NetbedResult};

/// Handle to a registered network namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceHandle {
    name: String,
    path: PathBuf,
}

impl NamespaceHandle {
    /// Create a handle for a namespace reachable at `path`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Registry name of the namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path that opens to the namespace file descriptor.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "netns:{}", self.name)
    }
}

/// Name to namespace mapping.
pub trait NamespaceRegistry: Send + Sync {
    /// Register the network namespace of `pid` under `name`.
    ///
    /// A stale entry with the same name is replaced.
    fn bind(&self, name: &str, pid: u32) -> NetbedResult<NamespaceHandle>;

    /// Remove the entry for `name`. Returns whether an entry existed.
    fn unbind(&self, name: &str) -> NetbedResult<bool>;

    /// Look up a live entry.
    fn lookup(&self, name: &str) -> NetbedResult<Option<NamespaceHandle>>;
}

/// Registry backed by a directory of symlinks.
#[derive(Debug, Clone)]
pub struct FsNamespaceRegistry {
    paths: NetbedPaths,
}

impl FsNamespaceRegistry {
    /// Create a registry rooted at the configured namespace directory.
    #[must_use]
    pub const fn new(paths: NetbedPaths) -> Self {
        Self { paths }
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.paths.netns
    }

    fn remove_entry(&self, name: &str, entry: &Path) -> NetbedResult<bool> {
        match std::fs::remove_file(entry) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(NetbedError::runtime(name, "remove namespace entry", e)),
        }
    }
}

impl NamespaceRegistry for FsNamespaceRegistry {
    fn bind(&self, name: &str, pid: u32) -> NetbedResult<NamespaceHandle> {
        let entry = self.paths.netns_entry(name);
        let target = NetbedPaths::proc_netns(pid);

        std::fs::create_dir_all(&self.paths.netns)
            .map_err(|e| NetbedError::runtime(name, "create namespace registry", e))?;

        // pids are not stable across restarts
        if self.remove_entry(name, &entry)? {
            tracing::debug!(name, path = %entry.display(), "Removed stale namespace entry");
        }

        std::os::unix::fs::symlink(&target, &entry)
            .map_err(|e| NetbedError::runtime(name, "register namespace", e))?;

        tracing::debug!(name, pid, path = %entry.display(), "Registered network namespace");
        Ok(NamespaceHandle::new(name, entry))
    }

    fn unbind(&self, name: &str) -> NetbedResult<bool> {
        let entry = self.paths.netns_entry(name);
        let existed = self.remove_entry(name, &entry)?;
        if existed {
            tracing::debug!(name, path = %entry.display(), "Unregistered network namespace");
        }
        Ok(existed)
    }

    fn lookup(&self, name: &str) -> NetbedResult<Option<NamespaceHandle>> {
        let entry = self.paths.netns_entry(name);
        // Follows the symlink: an entry whose process is gone is not live.
        if entry.exists() {
            Ok(Some(NamespaceHandle::new(name, entry)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> FsNamespaceRegistry {
        FsNamespaceRegistry::new(NetbedPaths::with_netns_dir(dir.path().join("netns")))
    }

    #[test]
    fn bind_creates_entry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let pid = std::process::id();

        let handle = registry.bind("h1", pid).unwrap();
        assert_eq!(handle.name(), "h1");
        assert_eq!(
            std::fs::read_link(handle.path()).unwrap(),
            NetbedPaths::proc_netns(pid)
        );
        assert_eq!(registry.lookup("h1").unwrap(), Some(handle));
    }

    #[test]
    fn bind_replaces_stale_entry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let pid = std::process::id();

        registry.bind("h1", u32::MAX).unwrap();
        assert_eq!(registry.lookup("h1").unwrap(), None);

        let handle = registry.bind("h1", pid).unwrap();
        assert_eq!(
            std::fs::read_link(handle.path()).unwrap(),
            NetbedPaths::proc_netns(pid)
        );
    }

    #[test]
    fn unbind_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.bind("h2", std::process::id()).unwrap();
        assert!(registry.unbind("h2").unwrap());
        assert!(!registry.unbind("h2").unwrap());
        assert_eq!(registry.lookup("h2").unwrap(), None);
    }

    #[test]
    fn unbind_without_registry_dir() {
        let dir = TempDir::new().unwrap();
        assert!(!registry(&dir).unbind("ghost").unwrap());
    }
}
