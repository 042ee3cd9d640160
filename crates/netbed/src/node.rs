//! Node controller.
//!
//! A node is a privileged container whose network namespace is registered
//! under the node's name, so the link wiring engine can address it.

use netbed_common::{ErrorKind, NetbedError, NetbedResult};

use crate::context::Context;
use crate::ledger::{EntityState, Ledger, NodeRuntime};
use crate::runtime::ContainerSpec;
use crate::topology::{EntityRef, NodeId, Topology};

/// Run the node's container and register its namespace.
///
/// If anything fails after the container may have been created, the
/// container is stopped and removed before the error is returned. A
/// container that already held the node's name is left alone.
pub async fn start(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: NodeId,
) -> NetbedResult<()> {
    let node = topology.node(id);
    let name = node.name.as_str();
    if ledger.state(EntityRef::Node(id)) != EntityState::Declared {
        return Err(NetbedError::state(name, "node was already started in this run"));
    }

    tracing::debug!(node = %name, image = %node.image, "Starting container");
    let spec = ContainerSpec::for_node(node);
    if let Err(e) = ctx
        .call(name, "run container", ctx.runtime().run(&spec))
        .await
    {
        // a name conflict means the container is not ours
        if e.kind() != ErrorKind::State {
            discard_container(ctx, name).await;
        }
        return Err(e);
    }

    let registered = async {
        let pid = ctx
            .call(name, "inspect container", ctx.runtime().pid(name))
            .await?;
        let namespace = ctx.registry().bind(name, pid).map_err(|e| e.within(name))?;
        tracing::debug!(node = %name, pid, %namespace, "Registered node namespace");
        ledger.record_node(id, NodeRuntime { pid, namespace })
    }
    .await;

    if let Err(e) = registered {
        discard_container(ctx, name).await;
        return Err(e);
    }

    ledger.activate(EntityRef::Node(id))?;
    tracing::info!(node = %name, "Node started");
    Ok(())
}

/// Stop and remove the node's container, then drop its registry entry.
///
/// Absent containers and entries count as success. Every step is attempted;
/// the first failure is returned.
pub async fn stop(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: NodeId,
) -> NetbedResult<()> {
    let name = topology.node(id).name.as_str();

    let stopped = ctx
        .call(name, "stop container", ctx.runtime().stop(name))
        .await;
    let removed = ctx
        .call(name, "remove container", ctx.runtime().remove(name))
        .await;
    let unbound = ctx.registry().unbind(name).map_err(|e| e.within(name));

    match (&stopped, &removed, &unbound) {
        (_, Ok(true), _) => tracing::info!(node = %name, "Node stopped"),
        (_, Ok(false), _) => tracing::debug!(node = %name, "No container to remove"),
        _ => {}
    }

    stopped?;
    removed?;
    unbound?;
    ledger.remove(EntityRef::Node(id))
}

async fn discard_container(ctx: &Context, name: &str) {
    tracing::debug!(node = %name, "Discarding partially started container");
    if let Err(e) = ctx
        .call(name, "stop container", ctx.runtime().stop(name))
        .await
    {
        tracing::warn!(node = %name, error = %e, "Failed to stop container");
    }
    if let Err(e) = ctx
        .call(name, "remove container", ctx.runtime().remove(name))
        .await
    {
        tracing::warn!(node = %name, error = %e, "Failed to remove container");
    }
    if let Err(e) = ctx.registry().unbind(name) {
        tracing::warn!(node = %name, error = %e, "Failed to remove namespace entry");
    }
}
