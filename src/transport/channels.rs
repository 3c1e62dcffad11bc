//! The channel sets owned by each role.
//!
//! Components receive these as values instead of opening sockets
//! themselves, so tests can hand in listeners bound to ephemeral ports.

use std::collections::BTreeMap;

use tokio::net::TcpListener;
use tracing::info;

use super::{channel, Hub, Link, Multipart};
use crate::config::{ClusterConfig, CoordinatorAddresses};
use crate::error::{Error, Result};

// =============================================================================
// Coordinator Side
// =============================================================================

/// The three channels the coordinator binds.
#[derive(Debug)]
pub struct CoordinatorChannels {
    /// Point-to-point commands to one node
    pub tasks: Hub,
    /// Acks and read responses from every node
    pub results: Hub,
    /// Fan-out to every node
    pub broadcast: Hub,
}

impl CoordinatorChannels {
    /// Bind the configured addresses.
    pub async fn bind(addresses: &CoordinatorAddresses) -> Result<Self> {
        Ok(Self {
            tasks: Hub::bind(channel::TASKS, &addresses.task_address).await?,
            results: Hub::bind(channel::RESULTS, &addresses.result_address).await?,
            broadcast: Hub::bind(channel::BROADCAST, &addresses.broadcast_address).await?,
        })
    }

    /// Use listeners that are already bound (tasks, results, broadcast).
    pub fn from_listeners(
        tasks: TcpListener,
        results: TcpListener,
        broadcast: TcpListener,
    ) -> Result<Self> {
        Ok(Self {
            tasks: Hub::from_listener(channel::TASKS, tasks)?,
            results: Hub::from_listener(channel::RESULTS, results)?,
            broadcast: Hub::from_listener(channel::BROADCAST, broadcast)?,
        })
    }

    /// Wait until every listed node is connected on all three channels.
    pub async fn wait_for_nodes(&self, nodes: &[usize], timeout: std::time::Duration) -> Result<()> {
        self.tasks.wait_for(nodes, timeout).await?;
        self.results.wait_for(nodes, timeout).await?;
        self.broadcast.wait_for(nodes, timeout).await
    }

    /// Nodes connected on all three channels, ascending.
    pub fn connected_nodes(&self) -> Vec<usize> {
        self.tasks
            .connected_nodes()
            .into_iter()
            .filter(|&n| self.results.is_connected(n) && self.broadcast.is_connected(n))
            .collect()
    }
}

// =============================================================================
// Storage Node Side
// =============================================================================

/// Channels of one storage node.
#[derive(Debug)]
pub struct NodeChannels {
    pub index: usize,
    /// Commands addressed to this node
    pub tasks: Link,
    /// Outbound acks and read responses
    pub results: Link,
    /// Read requests sent to every node
    pub broadcast: Link,
    /// Stores and acks from other nodes
    pub peer_inbox: Hub,
    /// Outgoing connections to every other node's peer inbox
    pub peers: BTreeMap<usize, Link>,
}

impl NodeChannels {
    /// Bind this node's peer address and connect everything else.
    pub async fn open(config: &ClusterConfig, index: usize) -> Result<Self> {
        let peer_inbox = Hub::bind(channel::PEER, config.peer_address(index)?).await?;
        Self::with_peer_inbox(config, index, peer_inbox)
    }

    /// Like [`NodeChannels::open`], with the peer listener already bound.
    pub fn with_listener(config: &ClusterConfig, index: usize, listener: TcpListener) -> Result<Self> {
        let peer_inbox = Hub::from_listener(channel::PEER, listener)?;
        Self::with_peer_inbox(config, index, peer_inbox)
    }

    fn with_peer_inbox(config: &ClusterConfig, index: usize, peer_inbox: Hub) -> Result<Self> {
        config.peer_address(index)?;
        let reconnect = config.timeouts.reconnect();
        let coordinator = &config.coordinator;

        let mut peers = BTreeMap::new();
        for node in config.nodes.iter().filter(|n| n.index != index) {
            peers.insert(
                node.index,
                Link::connect(channel::PEER, node.peer_address.clone(), index, reconnect)?,
            );
        }

        info!(node = index, peers = peers.len(), "Node channels opened");
        Ok(Self {
            index,
            tasks: Link::connect(channel::TASKS, coordinator.task_address.clone(), index, reconnect)?,
            results: Link::connect(
                channel::RESULTS,
                coordinator.result_address.clone(),
                index,
                reconnect,
            )?,
            broadcast: Link::connect(
                channel::BROADCAST,
                coordinator.broadcast_address.clone(),
                index,
                reconnect,
            )?,
            peer_inbox,
            peers,
        })
    }

    /// Send to the coordinator's result channel.
    pub fn send_result(&self, parts: Multipart) -> Result<()> {
        self.results.send(parts)
    }

    /// Send to another node's peer inbox.
    pub fn send_peer(&self, node: usize, parts: Multipart) -> Result<()> {
        self.peers
            .get(&node)
            .ok_or_else(|| Error::InvalidParameter(format!("node {} is not a peer of node {}", node, self.index)))?
            .send(parts)
    }

    /// Other nodes, ascending.
    pub fn peer_indices(&self) -> Vec<usize> {
        self.peers.keys().copied().collect()
    }
}
