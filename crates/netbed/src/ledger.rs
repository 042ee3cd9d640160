//! Per-run entity state.
//!
//! The parsed [`Topology`] never changes. Everything learned while bringing
//! it up (lifecycle state, container pids, namespace handles) is recorded here
//! instead, keyed by entity id. States only move forward:
//! `Declared -> Active -> Removed`.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;
use netbed_common::{NetbedError, NetbedResult};
use netbed_network::NamespaceHandle;
use serde::Serialize;

use crate::topology::{EntityRef, NodeId, Topology};

/// Lifecycle state of a node, bridge, or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityState {
    /// Parsed, nothing created yet.
    Declared,
    /// OS-level resources exist.
    Active,
    /// Torn down.
    Removed,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => f.write_str("declared"),
            Self::Active => f.write_str("active"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// Runtime identifiers of a started node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRuntime {
    /// Init process of the container.
    pub pid: u32,
    /// Registered network namespace.
    pub namespace: NamespaceHandle,
}

#[derive(Debug)]
struct Entry {
    name: String,
    state: EntityState,
}

/// State of one run over a topology.
#[derive(Debug)]
pub struct Ledger {
    entries: DashMap<EntityRef, Entry>,
    runtimes: DashMap<NodeId, NodeRuntime>,
}

impl Ledger {
    /// Track every entity of `topology` as [`EntityState::Declared`].
    #[must_use]
    pub fn new(topology: &Topology) -> Self {
        let entities = topology
            .nodes()
            .map(|(id, _)| EntityRef::Node(id))
            .chain(topology.bridges().map(|(id, _)| EntityRef::Bridge(id)))
            .chain(topology.links().map(|(id, _)| EntityRef::Link(id)));

        let entries = entities
            .map(|entity| {
                let entry = Entry {
                    name: topology.entity_name(entity).to_string(),
                    state: EntityState::Declared,
                };
                (entity, entry)
            })
            .collect();

        Self {
            entries,
            runtimes: DashMap::new(),
        }
    }

    /// Current state. Unknown entities read as declared.
    #[must_use]
    pub fn state(&self, entity: EntityRef) -> EntityState {
        self.entries
            .get(&entity)
            .map_or(EntityState::Declared, |e| e.state)
    }

    /// Whether the entity's resources exist.
    #[must_use]
    pub fn is_active(&self, entity: EntityRef) -> bool {
        self.state(entity) == EntityState::Active
    }

    /// `Declared -> Active`.
    pub fn activate(&self, entity: EntityRef) -> NetbedResult<()> {
        let mut entry = self.entry(entity)?;
        if entry.state != EntityState::Declared {
            return Err(NetbedError::state(
                &entry.name,
                format!("cannot activate from state {}", entry.state),
            ));
        }
        entry.state = EntityState::Active;
        Ok(())
    }

    /// Mark the entity torn down. Removing twice is a no-op.
    pub fn remove(&self, entity: EntityRef) -> NetbedResult<()> {
        let mut entry = self.entry(entity)?;
        entry.state = EntityState::Removed;
        Ok(())
    }

    /// Record the runtime identifiers of a node, once per run.
    pub fn record_node(&self, node: NodeId, runtime: NodeRuntime) -> NetbedResult<()> {
        match self.runtimes.entry(node) {
            Slot::Occupied(_) => Err(NetbedError::state(
                self.name(EntityRef::Node(node)),
                "runtime identifiers already recorded in this run",
            )),
            Slot::Vacant(slot) => {
                slot.insert(runtime);
                Ok(())
            }
        }
    }

    /// Runtime identifiers recorded for a node.
    #[must_use]
    pub fn node_runtime(&self, node: NodeId) -> Option<NodeRuntime> {
        self.runtimes.get(&node).map(|r| r.clone())
    }

    /// Entities currently in `state`, in id order.
    #[must_use]
    pub fn in_state(&self, state: EntityState) -> Vec<EntityRef> {
        let mut entities: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| *e.key())
            .collect();
        entities.sort_unstable();
        entities
    }

    fn name(&self, entity: EntityRef) -> String {
        self.entries
            .get(&entity)
            .map_or_else(|| entity.to_string(), |e| e.name.clone())
    }

    fn entry(
        &self,
        entity: EntityRef,
    ) -> NetbedResult<dashmap::mapref::one::RefMut<'_, EntityRef, Entry>> {
        self.entries
            .get_mut(&entity)
            .ok_or_else(|| NetbedError::state(entity.to_string(), "not part of this topology"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"
network:
  hosts:
    - { name: h1, image: alpine }
    - { name: h2, image: alpine }
  links:
    - "h1:0:10.0.0.1/24-h2:0:10.0.0.2/24"
"#;

    fn runtime(pid: u32) -> NodeRuntime {
        NodeRuntime {
            pid,
            namespace: NamespaceHandle::new("h1", "/var/run/netns/h1"),
        }
    }

    #[test]
    fn states_move_forward() {
        let topology = Topology::from_yaml(TOPOLOGY).unwrap();
        let ledger = Ledger::new(&topology);
        let h1 = EntityRef::Node(topology.node_by_name("h1").unwrap());

        assert_eq!(ledger.state(h1), EntityState::Declared);
        ledger.activate(h1).unwrap();
        assert!(ledger.is_active(h1));

        let err = ledger.activate(h1).unwrap_err();
        assert!(matches!(err, NetbedError::State { ref entity, .. } if entity == "h1"));

        ledger.remove(h1).unwrap();
        ledger.remove(h1).unwrap();
        assert_eq!(ledger.state(h1), EntityState::Removed);
        assert!(ledger.activate(h1).is_err());
    }

    #[test]
    fn node_runtime_is_write_once() {
        let topology = Topology::from_yaml(TOPOLOGY).unwrap();
        let ledger = Ledger::new(&topology);
        let h1 = topology.node_by_name("h1").unwrap();

        assert_eq!(ledger.node_runtime(h1), None);
        ledger.record_node(h1, runtime(42)).unwrap();

        let err = ledger.record_node(h1, runtime(43)).unwrap_err();
        assert_eq!(err.entity(), Some("h1"));
        assert_eq!(ledger.node_runtime(h1).unwrap().pid, 42);
    }

    #[test]
    fn in_state_lists_entities() {
        let topology = Topology::from_yaml(TOPOLOGY).unwrap();
        let ledger = Ledger::new(&topology);
        assert_eq!(ledger.in_state(EntityState::Declared).len(), 3);

        let (link, _) = topology.links().next().unwrap();
        ledger.activate(EntityRef::Link(link)).unwrap();
        assert_eq!(
            ledger.in_state(EntityState::Active),
            vec![EntityRef::Link(link)]
        );
    }
}
