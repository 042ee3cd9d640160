//! Kernel network control over rtnetlink.
//!
//! Every operation names the scope it runs in. Host-scoped operations share
//! one netlink connection. Namespace-scoped operations run on a short-lived
//! OS thread that joins the target namespace and opens its own connection:
//! a netlink socket talks to the namespace it was created in, and `setns`
//! changes the calling thread for good, so pooled threads are never used.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd};
use std::path::PathBuf;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::future::{BoxFuture, FutureExt};
use netbed_common::{DeviceName, IpNet, NetbedError, NetbedResult};
use rtnetlink::{Handle, LinkBridge, LinkUnspec, LinkVeth};

use crate::netns::NamespaceHandle;

/// Where a device lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkScope {
    /// The host (initial) network namespace.
    Host,
    /// A registered network namespace.
    Namespace(NamespaceHandle),
}

impl fmt::Display for LinkScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Namespace(ns) => write!(f, "{ns}"),
        }
    }
}

/// Kernel network-control operations used by the wiring engine.
#[async_trait]
pub trait NetworkControl: Send + Sync {
    /// Create a bridge device in the host namespace.
    async fn create_bridge(&self, name: &DeviceName) -> NetbedResult<()>;

    /// Create a connected veth pair in the host namespace.
    async fn create_veth(&self, name: &DeviceName, peer: &DeviceName) -> NetbedResult<()>;

    /// Delete a device. Returns whether it existed.
    async fn delete_link(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<bool>;

    /// Set a device administratively up.
    async fn set_up(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<()>;

    /// Attach a host device to a bridge as a port.
    async fn set_master(&self, name: &DeviceName, master: &DeviceName) -> NetbedResult<()>;

    /// Move a host device into a registered namespace.
    async fn move_to_namespace(
        &self,
        name: &DeviceName,
        namespace: &NamespaceHandle,
    ) -> NetbedResult<()>;

    /// Assign an address to a device.
    async fn add_address(
        &self,
        scope: &LinkScope,
        name: &DeviceName,
        address: IpNet,
    ) -> NetbedResult<()>;
}

/// [`NetworkControl`] backed by rtnetlink.
pub struct RtnetlinkControl {
    handle: Handle,
}

impl RtnetlinkControl {
    /// Open a netlink connection in the host namespace.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect() -> NetbedResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| NetbedError::runtime("netlink", "open netlink socket", e))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn in_scope<T, F>(&self, scope: &LinkScope, op: F) -> NetbedResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Handle) -> BoxFuture<'static, NetbedResult<T>> + Send + 'static,
    {
        match scope {
            LinkScope::Host => op(self.handle.clone()).await,
            LinkScope::Namespace(ns) => run_in_namespace(ns.path().to_path_buf(), op).await,
        }
    }
}

impl fmt::Debug for RtnetlinkControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtnetlinkControl").finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkControl for RtnetlinkControl {
    async fn create_bridge(&self, name: &DeviceName) -> NetbedResult<()> {
        tracing::debug!(bridge = %name, "Creating bridge device");
        self.handle
            .link()
            .add(LinkBridge::new(name.as_str()).build())
            .execute()
            .await
            .map_err(|e| netlink_error(name.as_str(), "create bridge", e))
    }

    async fn create_veth(&self, name: &DeviceName, peer: &DeviceName) -> NetbedResult<()> {
        tracing::debug!(%name, %peer, "Creating veth pair");
        self.handle
            .link()
            .add(LinkVeth::new(name.as_str(), peer.as_str()).build())
            .execute()
            .await
            .map_err(|e| netlink_error(name.as_str(), "create veth pair", e))
    }

    async fn delete_link(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<bool> {
        tracing::debug!(%name, %scope, "Deleting device");
        let name = name.to_string();
        self.in_scope(scope, move |handle| {
            async move {
                let Some(index) = link_index(&handle, &name)
                    .await
                    .map_err(|e| netlink_error(&name, "look up device", e))?
                else {
                    return Ok(false);
                };
                match handle.link().del(index).execute().await {
                    Ok(()) => Ok(true),
                    // the peer was deleted first and took this end with it
                    Err(rtnetlink::Error::NetlinkError(msg))
                        if msg.code.is_some_and(|c| c.get().abs() == libc::ENODEV) =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(netlink_error(&name, "delete device", e)),
                }
            }
            .boxed()
        })
        .await
    }

    async fn set_up(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<()> {
        tracing::debug!(%name, %scope, "Bringing device up");
        let name = name.to_string();
        self.in_scope(scope, move |handle| {
            async move {
                let index = require_index(&handle, &name, "set device up").await?;
                handle
                    .link()
                    .set(LinkUnspec::new_with_index(index).up().build())
                    .execute()
                    .await
                    .map_err(|e| netlink_error(&name, "set device up", e))
            }
            .boxed()
        })
        .await
    }

    async fn set_master(&self, name: &DeviceName, master: &DeviceName) -> NetbedResult<()> {
        tracing::debug!(%name, %master, "Attaching device to bridge");
        let port = require_index(&self.handle, name.as_str(), "attach to bridge").await?;
        let bridge = require_index(&self.handle, master.as_str(), "attach to bridge").await?;
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(port).controller(bridge).build())
            .execute()
            .await
            .map_err(|e| netlink_error(name.as_str(), "attach to bridge", e))
    }

    async fn move_to_namespace(
        &self,
        name: &DeviceName,
        namespace: &NamespaceHandle,
    ) -> NetbedResult<()> {
        tracing::debug!(%name, %namespace, "Moving device into namespace");
        let index = require_index(&self.handle, name.as_str(), "move to namespace").await?;
        let ns = std::fs::File::open(namespace.path())
            .map_err(|e| NetbedError::runtime(namespace.name(), "open namespace", e))?;
        self.handle
            .link()
            .set(
                LinkUnspec::new_with_index(index)
                    .setns_by_fd(ns.as_raw_fd())
                    .build(),
            )
            .execute()
            .await
            .map_err(|e| netlink_error(name.as_str(), "move to namespace", e))
    }

    async fn add_address(
        &self,
        scope: &LinkScope,
        name: &DeviceName,
        address: IpNet,
    ) -> NetbedResult<()> {
        tracing::debug!(%name, %scope, %address, "Assigning address");
        let name = name.to_string();
        self.in_scope(scope, move |handle| {
            async move {
                let index = require_index(&handle, &name, "assign address").await?;
                handle
                    .address()
                    .add(index, address.addr(), address.prefix_len())
                    .execute()
                    .await
                    .map_err(|e| netlink_error(&name, "assign address", e))
            }
            .boxed()
        })
        .await
    }
}

/// Run `op` against a netlink connection opened inside the namespace at `path`.
async fn run_in_namespace<T, F>(path: PathBuf, op: F) -> NetbedResult<T>
where
    T: Send + 'static,
    F: FnOnce(Handle) -> BoxFuture<'static, NetbedResult<T>> + Send + 'static,
{
    let entity = path.display().to_string();
    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("netbed-netns".to_string())
        .spawn(move || {
            let _ = tx.send(enter_and_run(&path, op));
        })
        .map_err(|e| NetbedError::runtime(&entity, "spawn namespace worker", e))?;

    rx.await
        .map_err(|_| NetbedError::runtime(&entity, "enter namespace", "namespace worker exited"))?
}

fn enter_and_run<T, F>(path: &std::path::Path, op: F) -> NetbedResult<T>
where
    F: FnOnce(Handle) -> BoxFuture<'static, NetbedResult<T>>,
{
    let entity = path.display().to_string();
    let ns = std::fs::File::open(path)
        .map_err(|e| NetbedError::runtime(&entity, "open namespace", e))?;
    rustix::thread::move_into_link_name_space(
        ns.as_fd(),
        Some(rustix::thread::LinkNameSpaceType::Network),
    )
    .map_err(|e| NetbedError::runtime(&entity, "enter namespace", e))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| NetbedError::runtime(&entity, "open netlink socket", e))?;
        tokio::spawn(connection);
        op(handle).await
    })
}

async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>, rtnetlink::Error> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(link) => Ok(link.map(|msg| msg.header.index)),
        Err(rtnetlink::Error::NetlinkError(msg))
            if msg.code.is_some_and(|c| c.get().abs() == libc::ENODEV) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn require_index(handle: &Handle, name: &str, operation: &str) -> NetbedResult<u32> {
    link_index(handle, name)
        .await
        .map_err(|e| netlink_error(name, operation, e))?
        .ok_or_else(|| NetbedError::runtime(name, operation, "no such device"))
}

fn netlink_error(entity: &str, operation: &str, err: rtnetlink::Error) -> NetbedError {
    match &err {
        rtnetlink::Error::NetlinkError(msg)
            if msg.code.is_some_and(|c| c.get().abs() == libc::EPERM) =>
        {
            NetbedError::PermissionDenied {
                operation: format!("{operation} '{entity}'"),
            }
        }
        _ => NetbedError::runtime(entity, operation, err),
    }
}
