//! Subcommands and their results.
//!
//! Every command runs against an offline ring: the servers are never
//! contacted, and `--dead` only flips their liveness flag so the fallback
//! placement can be inspected.

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::Subcommand;
use corelib::{CacheNode, Endpoint, Node, NodeId, Ring, RingBuilder, RingSnapshot, Topology};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show which server each key is routed to.
    Locate {
        /// Cache server, as host:port. Repeat for each server.
        #[arg(short = 's', long = "server", required = true)]
        servers: Vec<Endpoint>,

        /// Server to treat as dead. Must also be listed with --server.
        #[arg(long)]
        dead: Vec<Endpoint>,

        /// Keys to locate.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show ring positions and hash-space share per server.
    Ring {
        /// Cache server, as host:port. Repeat for each server.
        #[arg(short = 's', long = "server", required = true)]
        servers: Vec<Endpoint>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResult {
    Locate { placements: Vec<Placement> },
    Ring { positions: usize, shares: Vec<Share> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub key: String,
    pub token: String,
    /// `None` when no alive server could be found.
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub server: String,
    pub positions: usize,
    pub percent: f64,
}

impl Command {
    pub fn execute(&self) -> Result<CommandResult> {
        match self {
            Command::Locate {
                servers,
                dead,
                keys,
            } => locate(servers, dead, keys),
            Command::Ring { servers } => ring(servers),
        }
    }
}

impl CommandResult {
    /// Plain-text rendering, one line per row.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            CommandResult::Locate { placements } => {
                for p in placements {
                    let server = p.server.as_deref().unwrap_or("-");
                    let _ = writeln!(out, "{}\t{}\t{}", p.key, p.token, server);
                }
            }
            CommandResult::Ring { positions, shares } => {
                let _ = writeln!(out, "{} positions", positions);
                for s in shares {
                    let _ = writeln!(out, "{}\t{}\t{:.2}%", s.server, s.positions, s.percent);
                }
            }
        }
        out
    }
}

/// Connection stand-in that only carries an endpoint and a liveness flag.
#[derive(Debug)]
struct OfflineNode {
    endpoint: Endpoint,
    alive: bool,
}

#[async_trait]
impl CacheNode for OfflineNode {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn ping(&self) -> bool {
        self.alive
    }

    async fn close(&self) -> corelib::Result<()> {
        Ok(())
    }
}

fn offline_ring(servers: &[Endpoint], dead: &[Endpoint]) -> Result<(Ring, RingSnapshot)> {
    let topology = Topology::new(servers.to_vec());
    if let Some(unknown) = dead.iter().find(|d| !topology.contains(d)) {
        bail!("dead server {} is not in the server list", unknown);
    }

    let nodes = topology
        .endpoints()
        .iter()
        .enumerate()
        .map(|(i, endpoint)| {
            let conn = Arc::new(OfflineNode {
                endpoint: endpoint.clone(),
                alive: !dead.contains(endpoint),
            });
            Arc::new(Node::new(NodeId(i as u64), conn))
        })
        .collect();

    let ring = RingBuilder::new().build()?;
    let snapshot = ring.build(nodes);
    tracing::debug!(
        servers = snapshot.node_count(),
        positions = snapshot.token_count(),
        dead = dead.len(),
        "built offline ring"
    );
    Ok((ring, snapshot))
}

fn locate(servers: &[Endpoint], dead: &[Endpoint], keys: &[String]) -> Result<CommandResult> {
    let (ring, snapshot) = offline_ring(servers, dead)?;

    let mut placements = Vec::with_capacity(keys.len());
    for key in keys {
        let server = ring.locate(&snapshot, key)?;
        placements.push(Placement {
            key: key.clone(),
            token: ring.key_token(key).to_string(),
            server: server.map(|n| n.endpoint_string()),
        });
    }
    Ok(CommandResult::Locate { placements })
}

fn ring(servers: &[Endpoint]) -> Result<CommandResult> {
    let (_, snapshot) = offline_ring(servers, &[])?;

    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for position in snapshot.positions() {
        if let Some(owner) = snapshot.owner(*position) {
            *counts.entry(owner.id()).or_default() += 1;
        }
    }

    let full = (1u64 << 32) as f64;
    let shares = snapshot
        .ownership()
        .into_iter()
        .map(|(node, arc)| Share {
            server: node.endpoint_string(),
            positions: counts.get(&node.id()).copied().unwrap_or(0),
            percent: arc as f64 / full * 100.0,
        })
        .collect();

    Ok(CommandResult::Ring {
        positions: snapshot.token_count(),
        shares,
    })
}
