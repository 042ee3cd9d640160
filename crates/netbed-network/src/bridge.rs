//! Host-side bridge settings.

use std::io::ErrorKind;
use std::path::Path;

use netbed_common::paths::BRIDGE_NF_CALL_IPTABLES;
use netbed_common::{NetbedError, NetbedResult};

/// Stop bridged traffic from traversing host iptables.
///
/// Returns `false` when the `br_netfilter` module is not loaded, in which
/// case bridged traffic is not filtered in the first place.
pub fn disable_bridge_netfilter() -> NetbedResult<bool> {
    disable_bridge_netfilter_at(Path::new(BRIDGE_NF_CALL_IPTABLES))
}

/// Write `0` to a bridge netfilter sysctl at `path`.
pub fn disable_bridge_netfilter_at(path: &Path) -> NetbedResult<bool> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Bridge netfilter not loaded");
        return Ok(false);
    }

    match std::fs::write(path, "0") {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Disabled bridge netfilter");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(NetbedError::PermissionDenied {
            operation: format!("write {}", path.display()),
        }),
        Err(e) => Err(e.into()),
    }
}
