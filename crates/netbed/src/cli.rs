//! netbed CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::config::NetbedConfig;
use crate::context::Context;
use crate::orchestrator::Orchestrator;
use crate::topology::{Endpoint, Topology};

/// netbed - ephemeral virtual network testbeds
#[derive(Parser)]
#[command(name = "netbed")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Deadline for each container or netlink call, in seconds
    #[arg(long, global = true, default_value = "30")]
    pub timeout: u64,

    /// Maximum concurrent operations per dependency level
    #[arg(short, long, global = true, default_value = "8")]
    pub jobs: usize,

    /// Namespace registry directory
    #[arg(long, global = true, env = "NETBED_NETNS_DIR")]
    pub netns_dir: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// netbed commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create every node, bridge and link of a topology
    Start {
        /// Topology file
        file: PathBuf,
    },

    /// Tear a topology down
    Stop {
        /// Topology file
        file: PathBuf,
    },

    /// Parse a topology and print it
    Validate {
        /// Topology file
        file: PathBuf,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled, Serialize)]
struct NodeRow {
    #[tabled(rename = "NODE")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "INTERFACES")]
    interfaces: String,
    #[tabled(rename = "VOLUME")]
    volume: String,
}

#[derive(Tabled, Serialize)]
struct BridgeRow {
    #[tabled(rename = "BRIDGE")]
    name: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "PORTS")]
    ports: String,
}

#[derive(Tabled, Serialize)]
struct LinkRow {
    #[tabled(rename = "LINK")]
    name: String,
    #[tabled(rename = "A")]
    a: String,
    #[tabled(rename = "B")]
    b: String,
}

#[derive(Serialize)]
struct Summary {
    nodes: Vec<NodeRow>,
    bridges: Vec<BridgeRow>,
    links: Vec<LinkRow>,
}

impl Summary {
    fn new(topology: &Topology) -> Self {
        let names = |ids: &[crate::topology::InterfaceId]| {
            ids.iter()
                .map(|&id| topology.interface(id).name.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let endpoint = |id| {
            let iface = topology.interface(id);
            let owner = topology.entity_name(iface.endpoint.owner());
            match iface.endpoint {
                Endpoint::Node { address, .. } => format!("{}@{owner} {address}", iface.name),
                Endpoint::Bridge { .. } => format!("{}@{owner}", iface.name),
            }
        };

        Self {
            nodes: topology
                .nodes()
                .map(|(_, n)| NodeRow {
                    name: n.name.clone(),
                    image: n.image.clone(),
                    interfaces: names(&n.interfaces),
                    volume: n.volume.as_ref().map_or_else(String::new, |v| {
                        format!("{}:{}", v.host_path.display(), v.container_path.display())
                    }),
                })
                .collect(),
            bridges: topology
                .bridges()
                .map(|(_, b)| BridgeRow {
                    name: b.name.to_string(),
                    address: b.address.to_string(),
                    ports: names(&b.interfaces),
                })
                .collect(),
            links: topology
                .links()
                .map(|(_, l)| LinkRow {
                    name: l.name.clone(),
                    a: endpoint(l.endpoints[0]),
                    b: endpoint(l.endpoints[1]),
                })
                .collect(),
        }
    }

    fn print_tables(self) {
        if self.nodes.is_empty() && self.bridges.is_empty() {
            println!("Empty topology");
            return;
        }
        if !self.nodes.is_empty() {
            println!("{}", Table::new(self.nodes));
        }
        if !self.bridges.is_empty() {
            println!("{}", Table::new(self.bridges));
        }
        if !self.links.is_empty() {
            println!("{}", Table::new(self.links));
        }
    }
}

impl Cli {
    fn config(&self) -> NetbedConfig {
        let config = NetbedConfig::default()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_parallelism(self.jobs);
        match &self.netns_dir {
            Some(dir) => config.with_netns_dir(dir),
            None => config,
        }
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Start { file } => {
                let topology = Topology::from_file(&file)?;
                let orchestrator = Orchestrator::new(topology, Context::connect(config)?);
                orchestrator.start().await?;
                let topology = orchestrator.topology();
                println!(
                    "Started {} nodes, {} bridges, {} links",
                    topology.nodes().len(),
                    topology.bridges().len(),
                    topology.links().len()
                );
                Ok(())
            }

            Commands::Stop { file } => {
                let topology = Topology::from_file(&file)?;
                let orchestrator = Orchestrator::new(topology, Context::connect(config)?);
                orchestrator.stop().await?;
                println!("Stopped");
                Ok(())
            }

            Commands::Validate { file, json } => {
                let topology = Topology::from_file(&file)?;
                let summary = Summary::new(&topology);
                if json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    summary.print_tables();
                }
                Ok(())
            }
        }
    }
}
