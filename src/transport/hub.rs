//! Bind side of a logical channel.
//!
//! A hub accepts connections from many nodes. Each connection introduces
//! itself with a handshake naming its node index; afterwards the hub can
//! address that node directly, fan a message out to every node, and receive
//! everything the nodes send on one queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{Multipart, MultipartCodec};
use super::{Handshake, OUTBOUND_QUEUE};
use crate::error::{Error, Result};

/// Time a new connection gets to send its handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct Peer {
    conn_id: u64,
    tx: mpsc::Sender<Multipart>,
}

/// Shared state of a hub's connection tasks.
#[derive(Clone)]
struct HubState {
    name: &'static str,
    peers: Arc<DashMap<usize, Peer>>,
    inbound: mpsc::UnboundedSender<(usize, Multipart)>,
    connected: Arc<Notify>,
    cancel: CancellationToken,
}

/// Listening endpoint of one channel.
pub struct Hub {
    name: &'static str,
    local_addr: SocketAddr,
    peers: Arc<DashMap<usize, Peer>>,
    inbound: mpsc::UnboundedReceiver<(usize, Multipart)>,
    connected: Arc<Notify>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("connected", &self.connected_nodes())
            .finish()
    }
}

impl Hub {
    /// Bind `addr` and start accepting.
    pub async fn bind(name: &'static str, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::Config(format!("cannot bind {} channel on {}: {}", name, addr, e))
        })?;
        Self::from_listener(name, listener)
    }

    /// Start accepting on an already bound listener.
    pub fn from_listener(name: &'static str, listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peers = Arc::new(DashMap::new());
        let connected = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let state = HubState {
            name,
            peers: peers.clone(),
            inbound: inbound_tx,
            connected: connected.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(accept_loop(state, listener));

        info!(channel = name, %local_addr, "Channel listening");
        Ok(Self {
            name,
            local_addr,
            peers,
            inbound: inbound_rx,
            connected,
            cancel,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Indices of connected nodes, ascending.
    pub fn connected_nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self.peers.iter().map(|e| *e.key()).collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn is_connected(&self, node: usize) -> bool {
        self.peers.contains_key(&node)
    }

    /// Queue a message for one node.
    pub fn send_to(&self, node: usize, parts: Multipart) -> Result<()> {
        let peer = self.peers.get(&node).ok_or_else(|| Error::NodeUnresponsive {
            node,
            operation: format!("{} send (not connected)", self.name),
        })?;
        peer.tx.try_send(parts).map_err(|e| Error::NodeUnresponsive {
            node,
            operation: match e {
                TrySendError::Full(_) => format!("{} send (queue full)", self.name),
                TrySendError::Closed(_) => format!("{} send (connection closed)", self.name),
            },
        })
    }

    /// Queue a message for every connected node; returns how many got it.
    pub fn broadcast(&self, parts: &Multipart) -> usize {
        self.peers
            .iter()
            .filter(|peer| peer.tx.try_send(parts.clone()).is_ok())
            .count()
    }

    /// Wait until all `nodes` are connected.
    pub async fn wait_for(&self, nodes: &[usize], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.connected.notified();
            let Some(&missing) = nodes.iter().find(|&&n| !self.is_connected(n)) else {
                return Ok(());
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::NodeUnresponsive {
                    node: missing,
                    operation: format!("{} connect", self.name),
                });
            }
        }
    }

    /// Next message from any node.
    pub async fn recv(&mut self) -> Option<(usize, Multipart)> {
        self.inbound.recv().await
    }

    /// Next message, or `None` once `timeout` elapses.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<(usize, Multipart)> {
        tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next already queued message, without waiting.
    pub fn try_recv(&mut self) -> Option<(usize, Multipart)> {
        self.inbound.try_recv().ok()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(state: HubState, listener: TcpListener) {
    let mut next_conn_id = 0u64;
    loop {
        let accepted = tokio::select! {
            _ = state.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                next_conn_id += 1;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(channel = state.name, error = %e, "Failed to set TCP_NODELAY");
                }
                debug!(channel = state.name, %remote, "Accepted connection");
                tokio::spawn(serve_connection(state.clone(), stream, next_conn_id));
            }
            Err(e) => warn!(channel = state.name, error = %e, "Accept failed"),
        }
    }
    debug!(channel = state.name, "Accept loop stopped");
}

async fn serve_connection(state: HubState, stream: TcpStream, conn_id: u64) {
    let mut framed = Framed::new(stream, MultipartCodec::default());

    let node = match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(parts))) => match Handshake::decode(&parts) {
            Ok(hello) => hello.node,
            Err(e) => {
                warn!(channel = state.name, error = %e, "Rejected connection with bad handshake");
                return;
            }
        },
        _ => {
            warn!(channel = state.name, "Connection closed before handshake");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
    state.peers.insert(node, Peer { conn_id, tx });
    state.connected.notify_waiters();
    info!(channel = state.name, node, "Node connected");

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            outbound = rx.recv() => match outbound {
                Some(parts) => {
                    if let Err(e) = framed.send(parts).await {
                        warn!(channel = state.name, node, error = %e, "Send failed, dropping connection");
                        break;
                    }
                }
                // replaced by a newer connection from the same node
                None => break,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(parts)) => {
                    if state.inbound.send((node, parts)).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(channel = state.name, node, error = %e, "Receive failed, dropping connection");
                    break;
                }
                None => break,
            },
        }
    }

    state.peers.remove_if(&node, |_, peer| peer.conn_id == conn_id);
    info!(channel = state.name, node, "Node disconnected");
}
