//! Cluster configuration.
//!
//! The coordinator's three channel addresses and the storage node registry
//! (index → peer address) are listed explicitly; the node count is the size
//! of the registry.
//!
//! ```yaml
//! coordinator:
//!   task_address: 127.0.0.1:5555
//!   result_address: 127.0.0.1:5556
//!   broadcast_address: 127.0.0.1:5557
//! nodes:
//!   - { index: 0, peer_address: 127.0.0.1:5560 }
//!   - { index: 1, peer_address: 127.0.0.1:5561 }
//! max_chunks_per_file: 10
//! data_dir: ./data
//! timeouts:
//!   ack_ms: 5000
//!   read_ms: 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fragment::MAX_CHUNKS_PER_FILE;
use crate::protocol::MAX_DATA_FRAMES;

// =============================================================================
// Addresses
// =============================================================================

/// Addresses the coordinator binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAddresses {
    /// Point-to-point commands to one node
    pub task_address: String,
    /// Acks and read responses from nodes
    pub result_address: String,
    /// Fan-out read requests to every node
    pub broadcast_address: String,
}

/// One entry of the node registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub index: usize,
    /// Address this node binds for node-to-node traffic
    pub peer_address: String,
}

// =============================================================================
// Timeouts
// =============================================================================

/// Deadlines for every blocking wait, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Waiting for all nodes to connect
    pub connect_ms: u64,
    /// Waiting for store acknowledgements (per attempt)
    pub ack_ms: u64,
    /// Waiting for read responses during retrieval (per attempt)
    pub read_ms: u64,
    /// Waiting for read responses while probing for repair
    pub probe_ms: u64,
    /// Waiting for a delegated worker's aggregated response (per attempt)
    pub delegated_ms: u64,
    /// Pause between reconnection attempts
    pub reconnect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            ack_ms: 5_000,
            read_ms: 2_000,
            probe_ms: 1_000,
            delegated_ms: 15_000,
            reconnect_ms: 200,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn ack(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn delegated(&self) -> Duration {
        Duration::from_millis(self.delegated_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

// =============================================================================
// Cluster Configuration
// =============================================================================

fn default_max_chunks() -> usize {
    MAX_CHUNKS_PER_FILE
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Static cluster membership and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub coordinator: CoordinatorAddresses,
    pub nodes: Vec<NodeAddress>,
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_file: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for ClusterConfig {
    /// Four nodes on the loopback interface.
    fn default() -> Self {
        Self {
            coordinator: CoordinatorAddresses {
                task_address: "127.0.0.1:5555".to_string(),
                result_address: "127.0.0.1:5556".to_string(),
                broadcast_address: "127.0.0.1:5557".to_string(),
            },
            nodes: vec![
                NodeAddress {
                    index: 0,
                    peer_address: "127.0.0.1:5560".to_string(),
                },
                NodeAddress {
                    index: 1,
                    peer_address: "127.0.0.1:5561".to_string(),
                },
                NodeAddress {
                    index: 2,
                    peer_address: "127.0.0.1:5562".to_string(),
                },
                NodeAddress {
                    index: 3,
                    peer_address: "127.0.0.1:5563".to_string(),
                },
            ],
            max_chunks_per_file: MAX_CHUNKS_PER_FILE,
            data_dir: default_data_dir(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: ClusterConfig = serde_yaml::from_str(yaml)?;
        config.nodes.sort_by_key(|n| n.index);
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check registry shape, limits and timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.len() < 2 {
            return Err(Error::Config(format!(
                "at least 2 storage nodes are required, got {}",
                self.nodes.len()
            )));
        }
        for (expected, node) in self.nodes.iter().enumerate() {
            if node.index != expected {
                return Err(Error::Config(format!(
                    "node indices must be 0..{} without gaps or duplicates, found {} at position {}",
                    self.nodes.len(),
                    node.index,
                    expected
                )));
            }
            if node.peer_address.is_empty() {
                return Err(Error::Config(format!("node {} has no peer address", node.index)));
            }
        }
        if self.max_chunks_per_file == 0 || self.max_chunks_per_file > MAX_DATA_FRAMES {
            return Err(Error::Config(format!(
                "max_chunks_per_file must be within 1..={}, got {}",
                MAX_DATA_FRAMES, self.max_chunks_per_file
            )));
        }

        let t = &self.timeouts;
        let timeouts = [
            ("connect_ms", t.connect_ms),
            ("ack_ms", t.ack_ms),
            ("read_ms", t.read_ms),
            ("probe_ms", t.probe_ms),
            ("delegated_ms", t.delegated_ms),
            ("reconnect_ms", t.reconnect_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("timeouts.{} must be non-zero", name)));
        }

        Ok(())
    }

    /// Number of storage nodes (N).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every node index.
    pub fn node_indices(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.index).collect()
    }

    /// Peer address of a registered node.
    pub fn peer_address(&self, index: usize) -> Result<&str> {
        self.nodes
            .iter()
            .find(|n| n.index == index)
            .map(|n| n.peer_address.as_str())
            .ok_or_else(|| Error::Config(format!("node {} is not in the registry", index)))
    }

    /// Directory owned by one node.
    pub fn node_dir(&self, index: usize) -> PathBuf {
        self.data_dir.join(index.to_string())
    }
}
