//! Connect side of a logical channel.
//!
//! A link keeps one outgoing connection alive. It reconnects after any
//! failure, re-sends the handshake on every new connection, and queues up to
//! [`OUTBOUND_QUEUE`] outbound messages while disconnected so callers never
//! block on the network. Sends beyond that fail with `QueueFull`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{Multipart, MultipartCodec};
use super::{Handshake, OUTBOUND_QUEUE};
use crate::error::{Error, Result};

/// Outgoing connection of one channel.
pub struct Link {
    name: &'static str,
    addr: String,
    outbound: mpsc::Sender<Multipart>,
    inbound: mpsc::UnboundedReceiver<Multipart>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Link {
    /// Start connecting to `addr`, introducing ourselves as `node`.
    ///
    /// Returns immediately; the connection is established in the background
    /// and re-established every `reconnect_interval` after a failure.
    pub fn connect(
        name: &'static str,
        addr: impl Into<String>,
        node: usize,
        reconnect_interval: Duration,
    ) -> Result<Self> {
        let addr = addr.into();
        let hello = Handshake::new(node, name).encode()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(connection_loop(ConnectionTask {
            name,
            addr: addr.clone(),
            hello,
            reconnect_interval,
            outbound: outbound_rx,
            inbound: inbound_tx,
            connected: connected.clone(),
            cancel: cancel.clone(),
        }));

        Ok(Self {
            name,
            addr,
            outbound: outbound_tx,
            inbound: inbound_rx,
            connected,
            cancel,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a message; it is delivered once the connection is up.
    pub fn send(&self, parts: Multipart) -> Result<()> {
        self.outbound.try_send(parts).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull {
                channel: self.name,
                target: self.addr.clone(),
                capacity: OUTBOUND_QUEUE,
            },
            TrySendError::Closed(_) => {
                Error::Internal(format!("{} link to {} is closed", self.name, self.addr))
            }
        })
    }

    /// Next message from the remote side.
    pub async fn recv(&mut self) -> Option<Multipart> {
        self.inbound.recv().await
    }

    /// Next message, or `None` once `timeout` elapses.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Multipart> {
        tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ConnectionTask {
    name: &'static str,
    addr: String,
    hello: Multipart,
    reconnect_interval: Duration,
    outbound: mpsc::Receiver<Multipart>,
    inbound: mpsc::UnboundedSender<Multipart>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

async fn connection_loop(mut task: ConnectionTask) {
    let mut attempts = 0u64;
    loop {
        if task.cancel.is_cancelled() {
            break;
        }

        let connecting = tokio::select! {
            _ = task.cancel.cancelled() => break,
            connecting = TcpStream::connect(&task.addr) => connecting,
        };

        match connecting {
            Ok(stream) => {
                attempts = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(channel = task.name, error = %e, "Failed to set TCP_NODELAY");
                }
                let mut framed = Framed::new(stream, MultipartCodec::default());
                if let Err(e) = framed.send(task.hello.clone()).await {
                    warn!(channel = task.name, addr = %task.addr, error = %e, "Handshake failed");
                } else {
                    task.connected.store(true, Ordering::Release);
                    info!(channel = task.name, addr = %task.addr, "Connected");
                    let keep_going = pump(&mut task, framed).await;
                    task.connected.store(false, Ordering::Release);
                    if !keep_going {
                        break;
                    }
                    info!(channel = task.name, addr = %task.addr, "Disconnected, reconnecting");
                }
            }
            Err(e) => {
                attempts += 1;
                // only the first failure of a streak is worth a line at debug level
                if attempts == 1 {
                    debug!(channel = task.name, addr = %task.addr, error = %e, "Connect failed, retrying");
                }
            }
        }

        tokio::select! {
            _ = task.cancel.cancelled() => break,
            _ = tokio::time::sleep(task.reconnect_interval) => {}
        }
    }
    debug!(channel = task.name, addr = %task.addr, "Link stopped");
}

/// Move messages until the connection drops. Returns `false` when the link
/// itself is shutting down.
async fn pump(task: &mut ConnectionTask, mut framed: Framed<TcpStream, MultipartCodec>) -> bool {
    loop {
        tokio::select! {
            _ = task.cancel.cancelled() => return false,
            outbound = task.outbound.recv() => match outbound {
                Some(parts) => {
                    if let Err(e) = framed.send(parts).await {
                        warn!(channel = task.name, addr = %task.addr, error = %e, "Send failed");
                        return true;
                    }
                }
                None => return false,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(parts)) => {
                    if task.inbound.send(parts).is_err() {
                        return false;
                    }
                }
                Some(Err(e)) => {
                    warn!(channel = task.name, addr = %task.addr, error = %e, "Receive failed");
                    return true;
                }
                None => return true,
            },
        }
    }
}
