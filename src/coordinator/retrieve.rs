//! Retrieve flow and the fragment probe it shares with repair.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::Coordinator;
use crate::domain::ports::CodingParams;
use crate::error::{Error, Result};
use crate::fragment::{join_chunks, FragmentId};
use crate::metrics::record_operation;
use crate::protocol::{Message, Payload};

/// A fragment some node answered for.
#[derive(Debug, Clone)]
pub(crate) struct FoundFragment {
    /// Node that answered
    pub node: usize,
    /// Chunks in chunk-index order
    pub chunks: Vec<Bytes>,
}

impl Coordinator {
    /// Rebuild a file from its fragment ids (slot order).
    #[instrument(skip(self, fragment_ids), fields(mode = %params.mode, fragments = fragment_ids.len()))]
    pub async fn retrieve(
        &mut self,
        fragment_ids: &[FragmentId],
        params: &CodingParams,
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let result = self.retrieve_inner(fragment_ids, params, original_size).await;
        record_operation("retrieve", &result);
        result
    }

    async fn retrieve_inner(
        &mut self,
        fragment_ids: &[FragmentId],
        params: &CodingParams,
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let codec = self.codec(params)?;
        if fragment_ids.len() != codec.fragment_count() {
            return Err(Error::InvalidParameter(format!(
                "{} fragment ids given, this cluster stores {} per file",
                fragment_ids.len(),
                codec.fragment_count()
            )));
        }

        let wait = self.config.timeouts.read();
        let found = self
            .collect_fragments(fragment_ids, wait, codec.required_fragments(), true)
            .await?;

        let fragments: BTreeMap<usize, Vec<u8>> = found
            .into_iter()
            .map(|(slot, f)| (slot, join_chunks(&f.chunks)))
            .collect();
        info!(
            received = fragments.len(),
            required = codec.required_fragments(),
            "Decoding file"
        );
        codec.decode(&fragments, original_size)
    }

    /// Broadcast a read request per fragment id and gather the answers.
    ///
    /// Stops when every id is satisfied, after `2 × ids` read responses, or
    /// at the deadline. With `retry`, ids still unsatisfied while fewer than
    /// `required` fragments arrived are asked for once more.
    pub(crate) async fn collect_fragments(
        &mut self,
        fragment_ids: &[FragmentId],
        wait: Duration,
        required: usize,
        retry: bool,
    ) -> Result<BTreeMap<usize, FoundFragment>> {
        self.drain_results();
        let slots: HashMap<&FragmentId, usize> = fragment_ids
            .iter()
            .enumerate()
            .map(|(slot, id)| (id, slot))
            .collect();
        let mut found: BTreeMap<usize, FoundFragment> = BTreeMap::new();
        let attempts = if retry { 2 } else { 1 };

        for attempt in 0..attempts {
            let wanted: Vec<usize> = (0..fragment_ids.len())
                .filter(|slot| !found.contains_key(slot))
                .collect();
            if attempt > 0 {
                if found.len() >= required || wanted.is_empty() {
                    break;
                }
                warn!(
                    received = found.len(),
                    required,
                    "Too few fragments, asking again"
                );
            }

            for &slot in &wanted {
                let request = Message::read_request(fragment_ids[slot].clone()).encode()?;
                let reached = self.channels.broadcast.broadcast(&request);
                debug!(slot, reached, "Read request broadcast");
            }

            let budget = 2 * wanted.len();
            let mut consumed = 0;
            let deadline = Instant::now() + wait;
            while found.len() < fragment_ids.len() && consumed < budget {
                let next = tokio::time::timeout_at(deadline, self.channels.results.recv()).await;
                let (from, parts) = match next {
                    Ok(Some(received)) => received,
                    Ok(None) => return Err(Error::Internal("result channel closed".to_string())),
                    Err(_) => break,
                };

                match Message::decode(parts) {
                    Ok(Message {
                        payload: Payload::FragmentReadResponse(response),
                        data,
                    }) => {
                        consumed += 1;
                        match slots.get(&response.fragment_id) {
                            Some(&slot) if !data.is_empty() => {
                                found.entry(slot).or_insert(FoundFragment {
                                    node: response.node,
                                    chunks: data,
                                });
                            }
                            _ => debug!(from, fragment = %response.fragment_id, "Discarding unrelated read response"),
                        }
                    }
                    Ok(other) => {
                        debug!(from, request_type = %other.request_type(), "Discarding result while reading");
                    }
                    Err(e) => warn!(from, error = %e, "Undecodable result"),
                }
            }
        }

        Ok(found)
    }
}
