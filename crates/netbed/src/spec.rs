//! Topology document parsing.
//!
//! ```yaml
//! network:
//!   hosts:
//!     - { name: h1, image: alpine, volume: [/srv/data, /data] }
//!   bridges:
//!     - { name: br0, address: 10.0.1.1/24, links: ["h1:1:10.0.1.2/24"] }
//!   links:
//!     - "h1:0:10.0.0.1/24-h2:0:10.0.0.2/24"
//! ```
//!
//! Endpoint tokens are `host:ifaceIndex:address`. A node interface is named
//! `<host><ifaceIndex>`; the bridge side of a bridge link is named
//! `<bridge>-<host><ifaceIndex>`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use netbed_common::{DeviceName, IpNet, NetbedError, NetbedResult, parse_cidr};
use serde::{Deserialize, Serialize};

use crate::topology::{Endpoint, NodeId, Topology, Volume};

/// Topology document (the top-level `network` key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyDocument {
    /// The network definition.
    pub network: NetworkSpec,
}

/// Network definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    /// Container-backed hosts.
    #[serde(default)]
    pub hosts: Vec<HostSpec>,

    /// Shared segments.
    #[serde(default)]
    pub bridges: Vec<BridgeSpec>,

    /// Point-to-point links, `endpoint-endpoint`.
    #[serde(default)]
    pub links: Vec<String>,
}

/// A `hosts` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSpec {
    /// Host name.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// `[hostPath, containerPath]`, mounted read-write.
    #[serde(default)]
    pub volume: Option<Vec<PathBuf>>,
}

/// A `bridges` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeSpec {
    /// Bridge device name.
    pub name: String,
    /// Address of the bridge device, in CIDR form.
    pub address: String,
    /// Host endpoints attached to this bridge.
    #[serde(default)]
    pub links: Vec<String>,
}

/// A parsed `host:ifaceIndex:address` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointToken<'a> {
    /// Host name.
    pub host: &'a str,
    /// Interface index on that host.
    pub index: u16,
    /// Declared address.
    pub address: IpNet,
}

impl<'a> EndpointToken<'a> {
    /// Parse a single endpoint token.
    ///
    /// `context` names the enclosing entry for error messages.
    pub fn parse(token: &'a str, context: &str) -> NetbedResult<Self> {
        // The address may be IPv6, so only the first two colons separate fields.
        let mut parts = token.splitn(3, ':');
        let (Some(host), Some(index), Some(address)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(token, context, "expected host:ifaceIndex:address"));
        };

        if host.is_empty() {
            return Err(malformed(token, context, "empty host name"));
        }
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(token, context, "interface index is not a number"));
        }
        let index = index
            .parse::<u16>()
            .map_err(|_| malformed(token, context, "interface index is out of range"))?;
        let address = parse_cidr(address, context)?;

        Ok(Self {
            host,
            index,
            address,
        })
    }

    /// Name of the node-side interface.
    pub fn interface_name(&self) -> NetbedResult<DeviceName> {
        DeviceName::new(format!("{}{}", self.host, self.index))
    }
}

/// Split `a-b` at the first `-` after the first token's address separator.
fn split_link(link: &str) -> NetbedResult<(&str, &str)> {
    let context = format!("link '{link}'");
    let address_start = link
        .match_indices(':')
        .nth(1)
        .map(|(i, _)| i)
        .ok_or_else(|| malformed(link, &context, "expected two endpoints joined by '-'"))?;
    let dash = link[address_start..]
        .find('-')
        .map(|i| address_start + i)
        .ok_or_else(|| malformed(link, &context, "expected two endpoints joined by '-'"))?;
    Ok((&link[..dash], &link[dash + 1..]))
}

fn malformed(token: &str, context: &str, reason: &str) -> NetbedError {
    NetbedError::config(format!(
        "malformed endpoint '{token}' in {context}: {reason}"
    ))
}

impl TopologyDocument {
    /// Parse from YAML.
    pub fn from_yaml(yaml: &str) -> NetbedResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| NetbedError::config(format!("invalid topology document: {e}")))
    }

    /// Parse from file.
    pub fn from_file(path: &Path) -> NetbedResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate the document and resolve every reference.
    pub fn resolve(&self) -> NetbedResult<Topology> {
        Resolver::default().resolve(&self.network)
    }
}

impl Topology {
    /// Parse and resolve a YAML topology document.
    pub fn from_yaml(yaml: &str) -> NetbedResult<Self> {
        TopologyDocument::from_yaml(yaml)?.resolve()
    }

    /// Parse and resolve a topology file.
    pub fn from_file(path: &Path) -> NetbedResult<Self> {
        TopologyDocument::from_file(path)?.resolve()
    }
}

/// Builds a [`Topology`] while enforcing name uniqueness.
#[derive(Default)]
struct Resolver {
    topology: Topology,
    /// Host and bridge names.
    entities: HashSet<String>,
    /// Every device name that can appear in the host namespace.
    devices: HashSet<DeviceName>,
}

impl Resolver {
    fn resolve(mut self, spec: &NetworkSpec) -> NetbedResult<Topology> {
        for host in &spec.hosts {
            self.add_host(host)?;
        }
        for bridge in &spec.bridges {
            self.add_bridge(bridge)?;
        }
        for link in &spec.links {
            self.add_link(link)?;
        }
        for bridge in &spec.bridges {
            for token in &bridge.links {
                self.add_bridge_link(&bridge.name, token)?;
            }
        }

        tracing::debug!(
            nodes = self.topology.nodes().len(),
            bridges = self.topology.bridges().len(),
            links = self.topology.links().len(),
            "Resolved topology"
        );
        Ok(self.topology)
    }

    fn claim_entity(&mut self, kind: &str, name: &str) -> NetbedResult<()> {
        if self.entities.insert(name.to_string()) {
            Ok(())
        } else {
            Err(NetbedError::config(format!(
                "duplicate name '{name}' for {kind}"
            )))
        }
    }

    fn claim_device(&mut self, name: &DeviceName) -> NetbedResult<()> {
        if self.devices.insert(name.clone()) {
            Ok(())
        } else {
            Err(NetbedError::config(format!(
                "duplicate interface name '{name}'"
            )))
        }
    }

    fn add_host(&mut self, host: &HostSpec) -> NetbedResult<()> {
        validate_host_name(&host.name)?;
        if host.image.trim().is_empty() {
            return Err(NetbedError::config(format!(
                "host '{}' has an empty image",
                host.name
            )));
        }
        self.claim_entity("host", &host.name)?;

        let volume = match host.volume.as_deref() {
            None => None,
            Some([host_path, container_path]) => Some(Volume {
                host_path: host_path.clone(),
                container_path: container_path.clone(),
            }),
            Some(other) => {
                return Err(NetbedError::config(format!(
                    "volume of host '{}' must be [hostPath, containerPath], got {} entries",
                    host.name,
                    other.len()
                )));
            }
        };

        self.topology
            .push_node(host.name.clone(), host.image.clone(), volume);
        Ok(())
    }

    fn add_bridge(&mut self, bridge: &BridgeSpec) -> NetbedResult<()> {
        let name = DeviceName::new(bridge.name.as_str())?;
        let address = parse_cidr(&bridge.address, format!("bridge '{}'", bridge.name))?;
        self.claim_entity("bridge", &bridge.name)?;
        self.claim_device(&name)?;
        self.topology.push_bridge(name, address);
        Ok(())
    }

    fn add_link(&mut self, link: &str) -> NetbedResult<()> {
        let context = format!("link '{link}'");
        let (first, second) = split_link(link)?;
        let first = EndpointToken::parse(first, &context)?;
        let second = EndpointToken::parse(second, &context)?;

        let halves = [
            self.node_half(&first, &context)?,
            self.node_half(&second, &context)?,
        ];
        self.topology.push_link(halves);
        Ok(())
    }

    fn add_bridge_link(&mut self, bridge_name: &str, token: &str) -> NetbedResult<()> {
        let context = format!("bridge '{bridge_name}' link '{token}'");
        let endpoint = EndpointToken::parse(token, &context)?;
        let bridge = self
            .topology
            .bridge_by_name(bridge_name)
            .ok_or_else(|| NetbedError::Reference {
                referrer: context.clone(),
                target_kind: "bridge",
                target: bridge_name.to_string(),
            })?;

        let node_half = self.node_half(&endpoint, &context)?;
        let port = DeviceName::new(format!("{bridge_name}-{}", node_half.0))?;
        self.claim_device(&port)?;

        self.topology
            .push_link([node_half, (port, Endpoint::Bridge { bridge })]);
        Ok(())
    }

    fn node_half(
        &mut self,
        token: &EndpointToken<'_>,
        context: &str,
    ) -> NetbedResult<(DeviceName, Endpoint)> {
        let node = self.lookup_host(token.host, context)?;
        let name = token.interface_name()?;
        self.claim_device(&name)?;
        Ok((
            name,
            Endpoint::Node {
                node,
                address: token.address,
            },
        ))
    }

    fn lookup_host(&self, host: &str, context: &str) -> NetbedResult<NodeId> {
        self.topology
            .node_by_name(host)
            .ok_or_else(|| NetbedError::Reference {
                referrer: context.to_string(),
                target_kind: "host",
                target: host.to_string(),
            })
    }
}

/// Host names double as container and namespace registry names.
fn validate_host_name(name: &str) -> NetbedResult<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(NetbedError::config(format!(
            "invalid host name '{name}': use letters, digits, '_', '.' or '-', starting with a letter or digit"
        )))
    }
}
