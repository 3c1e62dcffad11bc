//! Store flows: coordinator-encoded and delegated.

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::Coordinator;
use crate::domain::ports::CodingParams;
use crate::error::{Error, Result};
use crate::fragment::{split_chunks, FragmentId};
use crate::metrics::record_operation;
use crate::protocol::{Message, Payload};
use crate::transport::Multipart;

/// One fragment bound for one node.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub node: usize,
    pub fragment_id: FragmentId,
    pub parts: Multipart,
}

impl Placement {
    pub fn new(
        node: usize,
        fragment_id: FragmentId,
        fragment: &[u8],
        chunks_per_fragment: usize,
    ) -> Result<Self> {
        let chunks = split_chunks(fragment, chunks_per_fragment)?;
        let parts = Message::store_fragment(fragment_id.clone(), None, chunks).encode()?;
        Ok(Self {
            node,
            fragment_id,
            parts,
        })
    }
}

impl Coordinator {
    /// Encode `data` and place fragment `i` on node `i`.
    ///
    /// Returns the fragment ids in slot order once every node acknowledged.
    /// The delegated mode hands encoding to a random node instead.
    #[instrument(skip(self, data), fields(mode = %params.mode, size = data.len()))]
    pub async fn store(&mut self, data: &[u8], params: &CodingParams) -> Result<Vec<FragmentId>> {
        let result = if params.mode.is_delegated() {
            self.store_delegated(data, params).await
        } else {
            self.store_encoded(data, params).await
        };
        record_operation("store", &result);
        result
    }

    async fn store_encoded(&mut self, data: &[u8], params: &CodingParams) -> Result<Vec<FragmentId>> {
        let codec = self.codec(params)?;
        let fragments = codec.encode(data)?;
        let ids: Vec<FragmentId> = (0..fragments.len()).map(|_| FragmentId::random()).collect();

        let placements = fragments
            .iter()
            .enumerate()
            .map(|(slot, fragment)| {
                Placement::new(slot, ids[slot].clone(), fragment, codec.chunks_per_fragment())
            })
            .collect::<Result<Vec<_>>>()?;

        self.wait_for_cluster().await?;
        self.place_fragments(placements, "store").await?;

        info!(fragments = ids.len(), "File stored");
        Ok(ids)
    }

    /// Send each placement on the task channel and wait for its ack.
    ///
    /// Acks may arrive in any order. Anything else on the result channel is
    /// discarded. Unacknowledged placements are resent once after the ack
    /// deadline; a second miss fails with `NodeUnresponsive`.
    pub(crate) async fn place_fragments(
        &mut self,
        placements: Vec<Placement>,
        operation: &str,
    ) -> Result<()> {
        self.drain_results();
        let mut pending: BTreeMap<FragmentId, Placement> = placements
            .into_iter()
            .map(|p| (p.fragment_id.clone(), p))
            .collect();
        let timeout = self.config.timeouts.ack();

        for attempt in 0..2 {
            for placement in pending.values() {
                if attempt > 0 {
                    warn!(node = placement.node, fragment = %placement.fragment_id, "No ack, resending fragment");
                }
                if let Err(e) = self.channels.tasks.send_to(placement.node, placement.parts.clone()) {
                    debug!(node = placement.node, error = %e, "Fragment not sent");
                }
            }

            let deadline = Instant::now() + timeout;
            while !pending.is_empty() {
                let next = tokio::time::timeout_at(deadline, self.channels.results.recv()).await;
                let (from, parts) = match next {
                    Ok(Some(received)) => received,
                    Ok(None) => return Err(Error::Internal("result channel closed".to_string())),
                    Err(_) => break,
                };

                match Message::decode(parts) {
                    Ok(Message {
                        payload: Payload::StoreFragmentAck(ack),
                        ..
                    }) => {
                        let expected = pending.get(&ack.fragment_id).map(|p| p.node);
                        if expected == Some(ack.node) {
                            pending.remove(&ack.fragment_id);
                        } else {
                            debug!(from, fragment = %ack.fragment_id, "Discarding unrelated ack");
                        }
                    }
                    Ok(other) => {
                        debug!(from, request_type = %other.request_type(), "Discarding result while awaiting acks");
                    }
                    Err(e) => warn!(from, error = %e, "Undecodable result"),
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
        }

        let node = pending.values().map(|p| p.node).min().unwrap_or_default();
        Err(Error::NodeUnresponsive {
            node,
            operation: format!("{} ack", operation),
        })
    }

    /// Hand the whole file to one randomly chosen node, which encodes it and
    /// places every fragment itself.
    async fn store_delegated(
        &mut self,
        data: &[u8],
        params: &CodingParams,
    ) -> Result<Vec<FragmentId>> {
        let codec = self.codec(params)?;
        if data.is_empty() {
            return Err(Error::InvalidParameter("cannot store an empty file".to_string()));
        }

        self.wait_for_cluster().await?;
        let worker = *self
            .config
            .node_indices()
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::Config("no storage nodes configured".to_string()))?;
        let request_id: u64 = rand::random();
        let parts =
            Message::delegated_request(request_id, *params, Bytes::copy_from_slice(data)).encode()?;

        info!(worker, request_id, "Delegating store");
        self.drain_results();
        let timeout = self.config.timeouts.delegated();

        for attempt in 0..2 {
            if attempt > 0 {
                warn!(worker, request_id, "No delegated response, resending request");
            }
            if let Err(e) = self.channels.tasks.send_to(worker, parts.clone()) {
                debug!(worker, error = %e, "Delegated request not sent");
            }

            let deadline = Instant::now() + timeout;
            loop {
                let next = tokio::time::timeout_at(deadline, self.channels.results.recv()).await;
                let (from, received) = match next {
                    Ok(Some(received)) => received,
                    Ok(None) => return Err(Error::Internal("result channel closed".to_string())),
                    Err(_) => break,
                };

                let response = match Message::decode(received) {
                    Ok(Message {
                        payload: Payload::DelegatedStoreResponse(response),
                        ..
                    }) if response.request_id == request_id => response,
                    Ok(other) => {
                        debug!(from, request_type = %other.request_type(), "Discarding result while awaiting worker");
                        continue;
                    }
                    Err(e) => {
                        warn!(from, error = %e, "Undecodable result");
                        continue;
                    }
                };

                if let Some(reason) = response.failure {
                    return Err(Error::DelegationFailed {
                        node: worker,
                        reason,
                    });
                }
                if response.fragments.len() != codec.fragment_count() {
                    return Err(Error::DelegationFailed {
                        node: worker,
                        reason: format!(
                            "reported {} fragments, expected {}",
                            response.fragments.len(),
                            codec.fragment_count()
                        ),
                    });
                }
                info!(worker, fragments = response.fragments.len(), "Delegated store complete");
                return Ok(response.fragments);
            }
        }

        Err(Error::NodeUnresponsive {
            node: worker,
            operation: "delegated store".to_string(),
        })
    }
}
