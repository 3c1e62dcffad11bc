//! Storage node agent.
//!
//! # Message Handling
//!
//! ```text
//!            ┌──────────────────────── run loop ────────────────────────┐
//!            │                                                          │
//!  tasks ───►│ STORE_FRAGMENT ──────────► persist ──► ack (results|peer) │
//!            │ WORKER_DELEGATED_STORE ──► encode ──► persist own slot   │
//!            │                               └──► push to peers ──► await acks
//!            │                                            └──► response (results)
//!  bcast ───►│ FRAGMENT_READ_REQUEST ───► probe chunks ──► response if held
//!            │                                                          │
//!  peer  ───►│ STORE_FRAGMENT ──────────► persist ──► ack               │
//!            └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Messages are handled one at a time. A handler error is logged and the
//! loop continues; nothing a peer sends can stop the node.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::identity::NodeIdentity;
use crate::config::ClusterConfig;
use crate::domain::ports::CodingParams;
use crate::ec::build_codec_with_limit;
use crate::error::{Error, Result};
use crate::fragment::{split_chunks, ChunkStore, FragmentId};
use crate::metrics::{BYTES_STORED, FRAGMENTS_SERVED, FRAGMENTS_STORED, MESSAGE_ERRORS};
use crate::protocol::{
    DelegatedStoreRequest, FragmentReadRequest, Message, Payload, StoreFragment,
};
use crate::transport::{channel, Multipart, NodeChannels};

/// One storage node: its directory, identity and channels.
#[derive(Debug)]
pub struct StorageNode {
    index: usize,
    identity: NodeIdentity,
    config: Arc<ClusterConfig>,
    store: ChunkStore,
    channels: NodeChannels,
}

/// Running node task.
#[derive(Debug)]
pub struct NodeHandle {
    index: usize,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Stop the node and wait for its loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| Error::Internal(format!("node {} task failed: {}", self.index, e)))?
    }
}

impl StorageNode {
    /// Open the node directory and bind/connect the configured channels.
    pub async fn open(config: Arc<ClusterConfig>, index: usize) -> Result<Self> {
        let channels = NodeChannels::open(&config, index).await?;
        Self::with_channels(config, index, channels).await
    }

    /// Like [`StorageNode::open`], with the peer listener already bound.
    pub async fn open_with_listener(
        config: Arc<ClusterConfig>,
        index: usize,
        listener: TcpListener,
    ) -> Result<Self> {
        let channels = NodeChannels::with_listener(&config, index, listener)?;
        Self::with_channels(config, index, channels).await
    }

    async fn with_channels(
        config: Arc<ClusterConfig>,
        index: usize,
        channels: NodeChannels,
    ) -> Result<Self> {
        let store = ChunkStore::open(config.node_dir(index), config.max_chunks_per_file).await?;
        let identity = NodeIdentity::load_or_create(store.root()).await?;

        info!(
            node = index,
            identity = %identity,
            dir = %store.root().display(),
            "Storage node ready"
        );

        Ok(Self {
            index,
            identity,
            config,
            store,
            channels,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Run on a background task.
    pub fn spawn(self) -> NodeHandle {
        let cancel = CancellationToken::new();
        let index = self.index;
        let task = tokio::spawn(self.run(cancel.clone()));
        NodeHandle {
            index,
            cancel,
            task,
        }
    }

    /// Handle messages until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(node = self.index, "Storage node running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(parts) = self.channels.tasks.recv() => {
                    let result = self.handle_task(parts).await;
                    self.report(channel::TASKS, result);
                }
                Some(parts) = self.channels.broadcast.recv() => {
                    let result = self.handle_broadcast(parts).await;
                    self.report(channel::BROADCAST, result);
                }
                Some((from, parts)) = self.channels.peer_inbox.recv() => {
                    let result = self.handle_peer(from, parts).await;
                    self.report(channel::PEER, result);
                }
                else => break,
            }
        }

        info!(node = self.index, "Storage node stopped");
        Ok(())
    }

    fn report(&self, channel: &'static str, result: Result<()>) {
        if let Err(e) = result {
            error!(node = self.index, channel, error = %e, "Failed to handle message");
            MESSAGE_ERRORS.with_label_values(&[channel]).inc();
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    async fn handle_task(&mut self, parts: Multipart) -> Result<()> {
        let Message { payload, data } = Message::decode(parts)?;
        match payload {
            Payload::StoreFragment(request) => self.store_and_ack(request, data).await,
            Payload::DelegatedStoreRequest(request) => self.delegated_store(request, data).await,
            other => Err(Error::UnexpectedMessage {
                channel: channel::TASKS,
                request_type: other.request_type().to_string(),
            }),
        }
    }

    async fn handle_broadcast(&mut self, parts: Multipart) -> Result<()> {
        let Message { payload, .. } = Message::decode(parts)?;
        match payload {
            Payload::FragmentReadRequest(request) => self.serve_read(request).await,
            other => Err(Error::UnexpectedMessage {
                channel: channel::BROADCAST,
                request_type: other.request_type().to_string(),
            }),
        }
    }

    async fn handle_peer(&mut self, from: usize, parts: Multipart) -> Result<()> {
        let Message { payload, data } = Message::decode(parts)?;
        match payload {
            Payload::StoreFragment(request) => self.store_and_ack(request, data).await,
            Payload::StoreFragmentAck(ack) => {
                // late ack of a delegated store that already gave up
                debug!(node = self.index, from, fragment = %ack.fragment_id, "Ignoring stray ack");
                Ok(())
            }
            other => Err(Error::UnexpectedMessage {
                channel: channel::PEER,
                request_type: other.request_type().to_string(),
            }),
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Persist the data frames and acknowledge.
    #[instrument(skip(self, request, chunks), fields(node = self.index, fragment = %request.fragment_id))]
    async fn store_and_ack(&self, request: StoreFragment, chunks: Vec<Bytes>) -> Result<()> {
        self.persist(&request.fragment_id, &chunks).await?;

        let ack = Message::store_ack(request.fragment_id, self.index).encode()?;
        match request.return_address {
            Some(peer) => self.channels.send_peer(peer, ack),
            None => self.channels.send_result(ack),
        }
    }

    async fn persist(&self, fragment_id: &FragmentId, chunks: &[Bytes]) -> Result<()> {
        let written = self.store.write_fragment(fragment_id, chunks).await?;
        FRAGMENTS_STORED.inc();
        BYTES_STORED.inc_by(written);
        debug!(node = self.index, fragment = %fragment_id, bytes = written, "Stored fragment");
        Ok(())
    }

    /// Answer a read broadcast, staying silent if the fragment is not here.
    async fn serve_read(&self, request: FragmentReadRequest) -> Result<()> {
        let chunks = self.store.read_fragment(&request.fragment_id).await?;
        if chunks.is_empty() {
            debug!(node = self.index, fragment = %request.fragment_id, "Fragment not held");
            return Ok(());
        }

        FRAGMENTS_SERVED.inc();
        let response = Message::read_response(request.fragment_id, self.index, chunks);
        self.channels.send_result(response.encode()?)
    }

    /// Encode a whole file on behalf of the coordinator and place it.
    ///
    /// The coordinator always gets a response; placement failures are carried
    /// in it rather than returned.
    #[instrument(skip(self, request, data), fields(node = self.index, request_id = request.request_id))]
    async fn delegated_store(
        &mut self,
        request: DelegatedStoreRequest,
        data: Vec<Bytes>,
    ) -> Result<()> {
        let outcome = self.encode_and_place(&request.params, data).await;
        match &outcome {
            Ok(fragments) => info!(fragments = fragments.len(), "Delegated store complete"),
            Err(e) => warn!(error = %e, "Delegated store failed"),
        }

        let response = Message::delegated_response(
            request.request_id,
            self.index,
            outcome.map_err(|e| e.to_string()),
        );
        self.channels.send_result(response.encode()?)
    }

    async fn encode_and_place(
        &mut self,
        params: &CodingParams,
        data: Vec<Bytes>,
    ) -> Result<Vec<FragmentId>> {
        let [file] = data.as_slice() else {
            return Err(Error::Protocol(format!(
                "delegated store carries {} data frames, expected 1",
                data.len()
            )));
        };

        let node_count = self.config.node_count();
        let codec = build_codec_with_limit(params, node_count, self.config.max_chunks_per_file)?;
        let fragments = codec.encode(file)?;
        let ids: Vec<FragmentId> = (0..node_count).map(|_| FragmentId::random()).collect();

        let mut pending = BTreeMap::new();
        for (slot, fragment) in fragments.iter().enumerate() {
            let chunks = split_chunks(fragment, codec.chunks_per_fragment())?;
            if slot == self.index {
                self.persist(&ids[slot], &chunks).await?;
                continue;
            }
            let parts = Message::store_fragment(ids[slot].clone(), Some(self.index), chunks).encode()?;
            self.channels.send_peer(slot, parts.clone())?;
            pending.insert(slot, parts);
        }

        self.await_peer_acks(pending, &ids).await?;
        Ok(ids)
    }

    /// Wait for every peer to acknowledge; resend once, then give up.
    async fn await_peer_acks(
        &mut self,
        mut pending: BTreeMap<usize, Multipart>,
        ids: &[FragmentId],
    ) -> Result<()> {
        let timeout = self.config.timeouts.ack();

        for attempt in 0..2 {
            if attempt > 0 {
                for (&peer, parts) in &pending {
                    warn!(node = self.index, peer, "No ack from peer, resending fragment");
                    self.channels.send_peer(peer, parts.clone())?;
                }
            }

            let deadline = Instant::now() + timeout;
            while !pending.is_empty() {
                let next = tokio::time::timeout_at(deadline, self.channels.peer_inbox.recv()).await;
                let (from, parts) = match next {
                    Ok(Some(received)) => received,
                    Ok(None) => return Err(Error::Internal("peer inbox closed".to_string())),
                    Err(_) => break,
                };

                match Message::decode(parts) {
                    Ok(Message {
                        payload: Payload::StoreFragmentAck(ack),
                        ..
                    }) => {
                        if ids.get(ack.node) == Some(&ack.fragment_id) {
                            pending.remove(&ack.node);
                        } else {
                            debug!(node = self.index, from, fragment = %ack.fragment_id, "Ignoring unrelated ack");
                        }
                    }
                    // another worker may be placing into this node at the same time
                    Ok(Message {
                        payload: Payload::StoreFragment(request),
                        data,
                    }) => {
                        let result = self.store_and_ack(request, data).await;
                        self.report(channel::PEER, result);
                    }
                    Ok(other) => {
                        self.report(
                            channel::PEER,
                            Err(Error::UnexpectedMessage {
                                channel: channel::PEER,
                                request_type: other.request_type().to_string(),
                            }),
                        );
                    }
                    Err(e) => self.report(channel::PEER, Err(e)),
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
        }

        let node = pending.keys().next().copied().unwrap_or_default();
        Err(Error::NodeUnresponsive {
            node,
            operation: "delegated fragment ack".to_string(),
        })
    }
}
