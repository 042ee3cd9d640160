//! Link wiring engine.
//!
//! Each link becomes one veth pair created in the host namespace. The two
//! halves are then wired independently according to their endpoint:
//!
//! - a node endpoint moves into the node's namespace, comes up there and
//!   receives its declared address;
//! - a bridge endpoint stays in the host namespace, comes up and is enslaved
//!   to the bridge device. It never gets an address of its own.

use netbed_common::{DeviceName, IpNet, NetbedError, NetbedResult};
use netbed_network::{LinkScope, NamespaceHandle};

use crate::context::Context;
use crate::ledger::{EntityState, Ledger};
use crate::topology::{Endpoint, EntityRef, Interface, LinkId, Topology};

/// Where one half of a pair ends up.
#[derive(Debug)]
enum Attachment<'a> {
    Namespace {
        namespace: NamespaceHandle,
        address: IpNet,
    },
    Port {
        master: &'a DeviceName,
    },
}

/// Create and wire the veth pair of a link.
///
/// Both endpoint owners must be active; otherwise this fails with a state
/// error before any device is created. If wiring fails after the pair
/// exists, the pair is deleted again.
pub async fn create(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: LinkId,
) -> NetbedResult<()> {
    let link = topology.link(id);
    let name = link.name.as_str();
    if ledger.state(EntityRef::Link(id)) != EntityState::Declared {
        return Err(NetbedError::state(name, "link was already created in this run"));
    }

    let [a, b] = link.endpoints.map(|iface| topology.interface(iface));
    let attachments = [
        resolve(topology, ledger, name, a)?,
        resolve(topology, ledger, name, b)?,
    ];

    tracing::debug!(link = %name, "Creating veth pair");
    let created = ctx
        .call(
            name,
            "create veth pair",
            ctx.network().create_veth(&a.name, &b.name),
        )
        .await;
    if let Err(e) = created {
        // the kernel may have finished after the deadline
        if matches!(e, NetbedError::Timeout { .. }) {
            discard_pair(ctx, topology, name, [a, b]).await;
        }
        return Err(e);
    }

    let wired = async {
        for (iface, attachment) in [a, b].into_iter().zip(&attachments) {
            wire(ctx, name, iface, attachment).await?;
        }
        Ok::<_, NetbedError>(())
    }
    .await;

    if let Err(e) = wired {
        discard_pair(ctx, topology, name, [a, b]).await;
        return Err(e);
    }

    ledger.activate(EntityRef::Link(id))?;
    tracing::info!(link = %name, "Link created");
    Ok(())
}

/// Delete the veth pair of a link.
///
/// Each node half is looked up in its node's registered namespace only; a
/// host device with the same name is never touched. Bridge ports are looked
/// up in the host. Deleting either half removes its peer, so a missing pair
/// is success.
pub async fn remove(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: LinkId,
) -> NetbedResult<()> {
    let link = topology.link(id);
    let name = link.name.as_str();
    let halves = link.endpoints.map(|iface| topology.interface(iface));

    if delete_pair(ctx, topology, name, halves, Origin::Existing).await? {
        tracing::info!(link = %name, "Link removed");
    } else {
        tracing::debug!(link = %name, "No veth pair to delete");
    }
    ledger.remove(EntityRef::Link(id))
}

fn resolve<'a>(
    topology: &'a Topology,
    ledger: &Ledger,
    link: &str,
    iface: &Interface,
) -> NetbedResult<Attachment<'a>> {
    let owner = iface.endpoint.owner();
    if !ledger.is_active(owner) {
        return Err(NetbedError::state(
            link,
            format!(
                "endpoint owner '{}' is {}, not active",
                topology.entity_name(owner),
                ledger.state(owner)
            ),
        ));
    }

    match iface.endpoint {
        Endpoint::Node { node, address } => {
            let runtime = ledger.node_runtime(node).ok_or_else(|| {
                NetbedError::state(
                    link,
                    format!("node '{}' has no registered namespace", topology.node(node).name),
                )
            })?;
            Ok(Attachment::Namespace {
                namespace: runtime.namespace,
                address,
            })
        }
        Endpoint::Bridge { bridge } => Ok(Attachment::Port {
            master: &topology.bridge(bridge).name,
        }),
    }
}

async fn wire(
    ctx: &Context,
    link: &str,
    iface: &Interface,
    attachment: &Attachment<'_>,
) -> NetbedResult<()> {
    let net = ctx.network();
    match attachment {
        Attachment::Namespace { namespace, address } => {
            tracing::debug!(link, iface = %iface.name, %namespace, %address, "Wiring node endpoint");
            let scope = LinkScope::Namespace(namespace.clone());
            ctx.call(
                link,
                "move to namespace",
                net.move_to_namespace(&iface.name, namespace),
            )
            .await?;
            ctx.call(link, "set device up", net.set_up(&scope, &iface.name))
                .await?;
            ctx.call(
                link,
                "assign address",
                net.add_address(&scope, &iface.name, *address),
            )
            .await
        }
        Attachment::Port { master } => {
            tracing::debug!(link, iface = %iface.name, bridge = %master, "Wiring bridge port");
            ctx.call(
                link,
                "set device up",
                net.set_up(&LinkScope::Host, &iface.name),
            )
            .await?;
            ctx.call(
                link,
                "attach to bridge",
                net.set_master(&iface.name, master),
            )
            .await
        }
    }
}

/// Who may own a device found under a half's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Created by the current call, possibly not yet moved out of the host.
    Fresh,
    /// Left by an earlier start. Node halves only live in their namespace.
    Existing,
}

/// Scopes a half may currently live in, most likely first.
fn candidate_scopes(
    ctx: &Context,
    topology: &Topology,
    iface: &Interface,
    origin: Origin,
) -> NetbedResult<Vec<LinkScope>> {
    match iface.endpoint {
        Endpoint::Node { node, .. } => {
            let mut scopes = Vec::with_capacity(2);
            if let Some(namespace) = ctx.registry().lookup(&topology.node(node).name)? {
                scopes.push(LinkScope::Namespace(namespace));
            }
            if origin == Origin::Fresh {
                scopes.push(LinkScope::Host);
            }
            Ok(scopes)
        }
        Endpoint::Bridge { .. } => Ok(vec![LinkScope::Host]),
    }
}

/// Best-effort delete of a pair this call created.
async fn discard_pair(
    ctx: &Context,
    topology: &Topology,
    link: &str,
    halves: [&Interface; 2],
) {
    if let Err(e) = delete_pair(ctx, topology, link, halves, Origin::Fresh).await {
        tracing::warn!(link, error = %e, "Failed to delete veth pair");
    }
}

/// Delete whichever half can be found. Returns whether a device existed.
async fn delete_pair(
    ctx: &Context,
    topology: &Topology,
    link: &str,
    halves: [&Interface; 2],
    origin: Origin,
) -> NetbedResult<bool> {
    for iface in halves {
        let scopes =
            candidate_scopes(ctx, topology, iface, origin).map_err(|e| e.within(link))?;
        for scope in scopes {
            let existed = ctx
                .call(
                    link,
                    "delete veth",
                    ctx.network().delete_link(&scope, &iface.name),
                )
                .await?;
            if existed {
                tracing::debug!(link, iface = %iface.name, %scope, "Deleted veth pair");
                return Ok(true);
            }
        }
    }
    Ok(false)
}
