//! Framed multipart messaging between the coordinator and storage nodes.
//!
//! # Topology
//!
//! ```text
//!                      ┌──────────────────────────┐
//!                      │       Coordinator         │
//!                      │  tasks │ results │ bcast  │   (Hub: bind side)
//!                      └───┬────────▲────────┬────┘
//!            point-to-point│        │fan-in  │fan-out
//!        ┌─────────────────┼────────┼────────┼──────────────┐
//!        ▼                 ▼        │        ▼              ▼
//!  ┌───────────┐     ┌───────────┐  │  ┌───────────┐  ┌───────────┐
//!  │  node 0   │◄───►│  node 1   │◄─┴─►│  node 2   │  │  node 3   │
//!  └───────────┘peer └───────────┘     └───────────┘  └───────────┘
//!              (each node binds a peer Hub, connects Links to the others)
//! ```
//!
//! Every connection starts with a [`Handshake`] frame so the bind side knows
//! which node is on the other end. After that, each message is a list of
//! byte frames ([`Multipart`]) framed by [`MultipartCodec`].

pub mod channels;
pub mod codec;
pub mod hub;
pub mod link;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use channels::{CoordinatorChannels, NodeChannels};
pub use codec::{Multipart, MultipartCodec};
pub use hub::Hub;
pub use link::Link;

/// Messages queued per connection before sends are refused
pub const OUTBOUND_QUEUE: usize = 1024;

/// Channel names, as used in handshakes, logs and metrics.
pub mod channel {
    pub const TASKS: &str = "tasks";
    pub const RESULTS: &str = "results";
    pub const BROADCAST: &str = "broadcast";
    pub const PEER: &str = "peer";
}

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Index of the connecting node
    pub node: usize,
    /// Channel the connection is meant for
    pub channel: String,
}

impl Handshake {
    pub fn new(node: usize, channel: &str) -> Self {
        Self {
            node,
            channel: channel.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Multipart> {
        Ok(vec![Bytes::from(bincode::serialize(self)?)])
    }

    pub fn decode(parts: &Multipart) -> Result<Self> {
        match parts.as_slice() {
            [frame] => Ok(bincode::deserialize(frame)?),
            _ => Err(Error::Protocol(format!(
                "handshake must be a single frame, got {}",
                parts.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_handshake_single_frame() {
        let hello = Handshake::new(3, channel::PEER);
        let parts = hello.encode().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(Handshake::decode(&parts).unwrap(), hello);

        let mut two = parts.clone();
        two.push(Bytes::new());
        assert!(matches!(Handshake::decode(&two), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_link_and_hub_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut hub = Hub::from_listener(channel::TASKS, listener).unwrap();
        let mut link = Link::connect(channel::TASKS, addr, 2, Duration::from_millis(20)).unwrap();

        // queued before the connection exists
        link.send(vec![Bytes::from_static(b"up")]).unwrap();
        hub.wait_for(&[2], Duration::from_secs(5)).await.unwrap();
        assert_eq!(hub.connected_nodes(), vec![2]);

        let (from, parts) = hub.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(from, 2);
        assert_eq!(parts, vec![Bytes::from_static(b"up")]);

        hub.send_to(2, vec![Bytes::from_static(b"down")]).unwrap();
        let reply = link.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply, vec![Bytes::from_static(b"down")]);
    }

    #[tokio::test]
    async fn test_hub_send_to_unknown_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = Hub::from_listener(channel::RESULTS, listener).unwrap();

        assert!(matches!(
            hub.send_to(9, vec![Bytes::new()]),
            Err(Error::NodeUnresponsive { node: 9, .. })
        ));
        assert!(matches!(
            hub.wait_for(&[0], Duration::from_millis(50)).await,
            Err(Error::NodeUnresponsive { node: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_link_queue_is_bounded_while_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let link = Link::connect(channel::RESULTS, addr, 0, Duration::from_millis(20)).unwrap();
        for _ in 0..OUTBOUND_QUEUE {
            link.send(vec![Bytes::from_static(b"held")]).unwrap();
        }

        let overflow = link.send(vec![Bytes::from_static(b"one too many")]);
        assert!(matches!(
            overflow,
            Err(Error::QueueFull {
                capacity: OUTBOUND_QUEUE,
                ..
            })
        ));
        assert!(overflow.unwrap_err().is_node_failure());
    }

    #[tokio::test]
    async fn test_link_reconnects_to_new_hub() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Hub::from_listener(channel::BROADCAST, listener).unwrap();
        let mut link =
            Link::connect(channel::BROADCAST, addr.to_string(), 1, Duration::from_millis(20))
                .unwrap();
        hub.wait_for(&[1], Duration::from_secs(5)).await.unwrap();

        hub.shutdown();
        drop(hub);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let listener = TcpListener::bind(addr).await.unwrap();
        let hub = Hub::from_listener(channel::BROADCAST, listener).unwrap();
        hub.wait_for(&[1], Duration::from_secs(5)).await.unwrap();

        assert_eq!(hub.broadcast(&vec![Bytes::from_static(b"again")]), 1);
        let got = link.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(got, vec![Bytes::from_static(b"again")]);
    }
}
