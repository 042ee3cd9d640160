//! Topology model.
//!
//! Entities live in per-kind arenas owned by [`Topology`] and refer to each
//! other by typed index, in both directions: a node lists its interfaces and
//! each interface names its owner through its [`Endpoint`]. The model is
//! read-only once parsed; runtime identifiers live in the
//! [`Ledger`](crate::ledger::Ledger).

use std::fmt;
use std::path::PathBuf;

use netbed_common::{DeviceName, IpNet};
use serde::Serialize;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Position in the owning arena.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(
    /// Index of a [`Node`].
    NodeId
);
arena_id!(
    /// Index of a [`Bridge`].
    BridgeId
);
arena_id!(
    /// Index of an [`Interface`].
    InterfaceId
);
arena_id!(
    /// Index of a [`Link`].
    LinkId
);

/// Any entity with a lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EntityRef {
    /// A container-backed node.
    Node(NodeId),
    /// A bridge device.
    Bridge(BridgeId),
    /// A veth link.
    Link(LinkId),
}

/// Host directory bind-mounted read-write into a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: PathBuf,
}

/// A container-backed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Node name; also the container and namespace registry name.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Optional bind mount.
    pub volume: Option<Volume>,
    /// Owned interfaces, in declaration order.
    pub interfaces: Vec<InterfaceId>,
}

/// A shared broadcast segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bridge {
    /// Bridge device name.
    pub name: DeviceName,
    /// Address held by the bridge device itself.
    pub address: IpNet,
    /// Attached ports, in declaration order.
    pub interfaces: Vec<InterfaceId>,
}

/// Owner of an interface, and what that owner needs to wire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endpoint {
    /// Lives in a node's namespace and carries its own address.
    Node {
        /// Owning node.
        node: NodeId,
        /// Declared address.
        address: IpNet,
    },
    /// Stays in the host namespace as a port of a bridge, without an address.
    Bridge {
        /// Owning bridge.
        bridge: BridgeId,
    },
}

impl Endpoint {
    /// The entity that owns this endpoint.
    #[must_use]
    pub const fn owner(&self) -> EntityRef {
        match self {
            Self::Node { node, .. } => EntityRef::Node(*node),
            Self::Bridge { bridge } => EntityRef::Bridge(*bridge),
        }
    }

    /// Declared address, if this endpoint carries one.
    #[must_use]
    pub const fn address(&self) -> Option<IpNet> {
        match self {
            Self::Node { address, .. } => Some(*address),
            Self::Bridge { .. } => None,
        }
    }
}

/// One half of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    /// Device name, unique across the topology.
    pub name: DeviceName,
    /// Owner and wiring data.
    pub endpoint: Endpoint,
    /// The link this interface belongs to.
    pub link: LinkId,
}

/// A veth pair joining two interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Display name, `<a>-<b>` from the two device names.
    pub name: String,
    /// The two halves.
    pub endpoints: [InterfaceId; 2],
}

/// A parsed topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Topology {
    nodes: Vec<Node>,
    bridges: Vec<Bridge>,
    interfaces: Vec<Interface>,
    links: Vec<Link>,
}

impl Topology {
    /// Iterate nodes with their ids.
    pub fn nodes(&self) -> impl ExactSizeIterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Iterate bridges with their ids.
    pub fn bridges(&self) -> impl ExactSizeIterator<Item = (BridgeId, &Bridge)> {
        self.bridges.iter().enumerate().map(|(i, b)| (BridgeId(i), b))
    }

    /// Iterate interfaces with their ids.
    pub fn interfaces(&self) -> impl ExactSizeIterator<Item = (InterfaceId, &Interface)> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(i, iface)| (InterfaceId(i), iface))
    }

    /// Iterate links with their ids.
    pub fn links(&self) -> impl ExactSizeIterator<Item = (LinkId, &Link)> {
        self.links.iter().enumerate().map(|(i, l)| (LinkId(i), l))
    }

    /// Get a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Get a bridge.
    #[must_use]
    pub fn bridge(&self, id: BridgeId) -> &Bridge {
        &self.bridges[id.0]
    }

    /// Get an interface.
    #[must_use]
    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[id.0]
    }

    /// Get a link.
    #[must_use]
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    /// Find a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Find a bridge by name.
    #[must_use]
    pub fn bridge_by_name(&self, name: &str) -> Option<BridgeId> {
        self.bridges
            .iter()
            .position(|b| b.name.as_str() == name)
            .map(BridgeId)
    }

    /// Find an interface by device name.
    #[must_use]
    pub fn interface_by_name(&self, name: &str) -> Option<InterfaceId> {
        self.interfaces
            .iter()
            .position(|i| i.name.as_str() == name)
            .map(InterfaceId)
    }

    /// Name of any entity.
    #[must_use]
    pub fn entity_name(&self, entity: EntityRef) -> &str {
        match entity {
            EntityRef::Node(id) => &self.node(id).name,
            EntityRef::Bridge(id) => self.bridge(id).name.as_str(),
            EntityRef::Link(id) => &self.link(id).name,
        }
    }

    pub(crate) fn push_node(&mut self, name: String, image: String, volume: Option<Volume>) {
        self.nodes.push(Node {
            name,
            image,
            volume,
            interfaces: Vec::new(),
        });
    }

    pub(crate) fn push_bridge(&mut self, name: DeviceName, address: IpNet) {
        self.bridges.push(Bridge {
            name,
            address,
            interfaces: Vec::new(),
        });
    }

    /// Add a link and its two interfaces, registering them with their owners.
    pub(crate) fn push_link(&mut self, halves: [(DeviceName, Endpoint); 2]) -> LinkId {
        let link = LinkId(self.links.len());
        let link_name = format!("{}-{}", halves[0].0, halves[1].0);
        let endpoints = halves.map(|(name, endpoint)| {
            let id = InterfaceId(self.interfaces.len());
            match endpoint {
                Endpoint::Node { node, .. } => self.nodes[node.0].interfaces.push(id),
                Endpoint::Bridge { bridge } => self.bridges[bridge.0].interfaces.push(id),
            }
            self.interfaces.push(Interface {
                name,
                endpoint,
                link,
            });
            id
        });
        self.links.push(Link {
            name: link_name,
            endpoints,
        });
        link
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node#{}", id.0),
            Self::Bridge(id) => write!(f, "bridge#{}", id.0),
            Self::Link(id) => write!(f, "link#{}", id.0),
        }
    }
}
