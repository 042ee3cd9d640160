//! Topology orchestrator.
//!
//! Start runs in two dependency levels: bridges and nodes first, then links,
//! which need both kinds of anchor. Entities within a level run concurrently,
//! bounded by the configured parallelism.
//!
//! Every entity that comes up is pushed onto a rollback stack. On the first
//! failure no further entities are started, the stack is unwound in reverse
//! and the original error is returned.
//!
//! Stop does not depend on a previous start in the same process: it removes
//! every link explicitly, then stops every node and bridge, attempting all of
//! them and reporting the first failure.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use netbed_common::{NetbedError, NetbedResult};
use parking_lot::Mutex;

use crate::context::Context;
use crate::ledger::{EntityState, Ledger};
use crate::topology::{EntityRef, Topology};
use crate::{bridge, link, node};

/// Brings a topology up and down.
#[derive(Debug)]
pub struct Orchestrator {
    ctx: Context,
    topology: Topology,
    ledger: Ledger,
}

impl Orchestrator {
    /// Create an orchestrator for one run over `topology`.
    #[must_use]
    pub fn new(topology: Topology, ctx: Context) -> Self {
        let ledger = Ledger::new(&topology);
        Self {
            ctx,
            topology,
            ledger,
        }
    }

    /// The topology being run.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// State of this run.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The provisioning context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    /// Bring the whole topology up, or leave nothing behind.
    ///
    /// An orchestrator starts once. Any later start fails with a state error
    /// before touching the host.
    pub async fn start(&self) -> NetbedResult<()> {
        tracing::info!(
            nodes = self.topology.nodes().len(),
            bridges = self.topology.bridges().len(),
            links = self.topology.links().len(),
            "Starting topology"
        );

        for state in [EntityState::Active, EntityState::Removed] {
            if let Some(&entity) = self.ledger.in_state(state).first() {
                return Err(NetbedError::state(
                    self.topology.entity_name(entity),
                    format!("already {state} in this run"),
                ));
            }
        }

        if self.ctx.config().disable_bridge_netfilter && self.topology.bridges().next().is_some() {
            match netbed_network::disable_bridge_netfilter() {
                Ok(true) => tracing::debug!("Bridge netfilter disabled"),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to disable bridge netfilter"),
            }
        }

        let anchors: Vec<EntityRef> = self
            .topology
            .bridges()
            .map(|(id, _)| EntityRef::Bridge(id))
            .chain(self.topology.nodes().map(|(id, _)| EntityRef::Node(id)))
            .collect();
        let links: Vec<EntityRef> = self
            .topology
            .links()
            .map(|(id, _)| EntityRef::Link(id))
            .collect();

        let stack = Mutex::new(Vec::new());
        for level in [anchors, links] {
            if let Err(e) = self.start_level(level, &stack).await {
                tracing::warn!(
                    entity = e.entity().unwrap_or("-"),
                    error = %e,
                    "Start failed, rolling back"
                );
                self.rollback(stack.into_inner()).await;
                return Err(e);
            }
        }

        tracing::info!("Topology started");
        Ok(())
    }

    /// Tear the whole topology down.
    ///
    /// Every entity is attempted; the first failure is returned.
    pub async fn stop(&self) -> NetbedResult<()> {
        tracing::info!("Stopping topology");

        let links: Vec<EntityRef> = self
            .topology
            .links()
            .map(|(id, _)| EntityRef::Link(id))
            .collect();
        let anchors: Vec<EntityRef> = self
            .topology
            .nodes()
            .map(|(id, _)| EntityRef::Node(id))
            .chain(self.topology.bridges().map(|(id, _)| EntityRef::Bridge(id)))
            .collect();

        let mut first_error = None;
        for level in [links, anchors] {
            let errors = self.stop_level(level).await;
            if first_error.is_none() {
                first_error = errors.into_iter().next();
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("Topology stopped");
                Ok(())
            }
        }
    }

    async fn start_level(
        &self,
        level: Vec<EntityRef>,
        stack: &Mutex<Vec<EntityRef>>,
    ) -> NetbedResult<()> {
        let abort = AtomicBool::new(false);
        let abort = &abort;

        let mut results = stream::iter(level)
            .map(|entity| async move {
                if abort.load(Ordering::Acquire) {
                    return None;
                }
                let result = self.start_entity(entity).await;
                match result {
                    Ok(()) => stack.lock().push(entity),
                    Err(_) => abort.store(true, Ordering::Release),
                }
                Some(result)
            })
            .buffer_unordered(self.ctx.config().parallelism.max(1));

        let mut first_error = None;
        while let Some(result) = results.next().await {
            if let Some(Err(e)) = result {
                first_error = first_error.or(Some(e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn stop_level(&self, level: Vec<EntityRef>) -> Vec<NetbedError> {
        stream::iter(level)
            .map(|entity| async move {
                let result = self.stop_entity(entity).await;
                if let Err(e) = &result {
                    tracing::warn!(
                        entity = self.topology.entity_name(entity),
                        error = %e,
                        "Failed to stop"
                    );
                }
                result.err()
            })
            .buffer_unordered(self.ctx.config().parallelism.max(1))
            .filter_map(futures::future::ready)
            .collect()
            .await
    }

    async fn rollback(&self, stack: Vec<EntityRef>) {
        for entity in stack.into_iter().rev() {
            let name = self.topology.entity_name(entity);
            tracing::debug!(entity = name, "Rolling back");
            if let Err(e) = self.stop_entity(entity).await {
                tracing::warn!(entity = name, error = %e, "Rollback step failed");
            }
        }
    }

    async fn start_entity(&self, entity: EntityRef) -> NetbedResult<()> {
        let (ctx, topology, ledger) = (&self.ctx, &self.topology, &self.ledger);
        match entity {
            EntityRef::Bridge(id) => bridge::start(ctx, topology, ledger, id).await,
            EntityRef::Node(id) => node::start(ctx, topology, ledger, id).await,
            EntityRef::Link(id) => link::create(ctx, topology, ledger, id).await,
        }
    }

    async fn stop_entity(&self, entity: EntityRef) -> NetbedResult<()> {
        let (ctx, topology, ledger) = (&self.ctx, &self.topology, &self.ledger);
        match entity {
            EntityRef::Bridge(id) => bridge::stop(ctx, topology, ledger, id).await,
            EntityRef::Node(id) => node::stop(ctx, topology, ledger, id).await,
            EntityRef::Link(id) => link::remove(ctx, topology, ledger, id).await,
        }
    }
}
