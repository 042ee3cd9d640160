//! Bridge controller.

use netbed_common::{NetbedError, NetbedResult};
use netbed_network::LinkScope;

use crate::context::Context;
use crate::ledger::{EntityState, Ledger};
use crate::topology::{Bridge, BridgeId, EntityRef, Topology};

/// Create the bridge device, bring it up and give it its address.
///
/// The device is deleted again if bring-up or addressing fails.
pub async fn start(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: BridgeId,
) -> NetbedResult<()> {
    let bridge = topology.bridge(id);
    let name = bridge.name.as_str();
    if ledger.state(EntityRef::Bridge(id)) != EntityState::Declared {
        return Err(NetbedError::state(name, "bridge was already started in this run"));
    }

    let created = ctx
        .call(name, "create bridge", ctx.network().create_bridge(&bridge.name))
        .await;
    if let Err(e) = created {
        // the kernel may have finished after the deadline
        if matches!(e, NetbedError::Timeout { .. }) {
            discard(ctx, name, bridge).await;
        }
        return Err(e);
    }

    let configured = async {
        ctx.call(
            name,
            "set device up",
            ctx.network().set_up(&LinkScope::Host, &bridge.name),
        )
        .await?;
        ctx.call(
            name,
            "assign address",
            ctx.network()
                .add_address(&LinkScope::Host, &bridge.name, bridge.address),
        )
        .await
    }
    .await;

    if let Err(e) = configured {
        discard(ctx, name, bridge).await;
        return Err(e);
    }

    ledger.activate(EntityRef::Bridge(id))?;
    tracing::info!(bridge = %name, address = %bridge.address, "Bridge started");
    Ok(())
}

/// Delete the bridge device. A missing device is success.
pub async fn stop(
    ctx: &Context,
    topology: &Topology,
    ledger: &Ledger,
    id: BridgeId,
) -> NetbedResult<()> {
    let bridge = topology.bridge(id);
    let name = bridge.name.as_str();

    let existed = ctx
        .call(
            name,
            "delete bridge",
            ctx.network().delete_link(&LinkScope::Host, &bridge.name),
        )
        .await?;
    if existed {
        tracing::info!(bridge = %name, "Bridge stopped");
    } else {
        tracing::debug!(bridge = %name, "No bridge device to delete");
    }
    ledger.remove(EntityRef::Bridge(id))
}

async fn discard(ctx: &Context, name: &str, bridge: &Bridge) {
    if let Err(e) = ctx
        .call(
            name,
            "delete bridge",
            ctx.network().delete_link(&LinkScope::Host, &bridge.name),
        )
        .await
    {
        tracing::warn!(bridge = %name, error = %e, "Failed to delete bridge");
    }
}
