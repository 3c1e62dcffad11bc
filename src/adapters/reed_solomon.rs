//! Reed-Solomon Codec Adapter
//!
//! Implements the `FragmentCodec` port using the Reed-Solomon erasure coding library.

use std::collections::BTreeMap;

use tracing::instrument;

use crate::domain::ports::{check_fragment_map, FragmentCodec, StorageMode};
use crate::ec::encoder::{EcDecoder, EcEncoder};
use crate::error::{Error, Result};

/// Reed-Solomon based erasure coding adapter.
///
/// `N` nodes with tolerance `t` use `k = N - t` data shards and `t` parity
/// shards, one shard per node.
#[derive(Clone)]
pub struct RsCodec {
    encoder: EcEncoder,
    decoder: EcDecoder,
    mode: StorageMode,
}

impl std::fmt::Debug for RsCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsCodec")
            .field("data_shards", &self.encoder.data_shards())
            .field("parity_shards", &self.encoder.parity_shards())
            .finish()
    }
}

impl RsCodec {
    /// Create a Reed-Solomon codec adapter.
    ///
    /// # Arguments
    /// * `node_count` - Number of fragments, one per node (N)
    /// * `tolerance` - Fragments that may be lost (t < N)
    pub fn new(node_count: usize, tolerance: usize) -> Result<Self> {
        if tolerance >= node_count {
            return Err(Error::InvalidParameter(format!(
                "tolerance {} must be smaller than the node count {}",
                tolerance, node_count
            )));
        }
        let data_shards = node_count - tolerance;

        Ok(Self {
            encoder: EcEncoder::new(data_shards, tolerance)?,
            decoder: EcDecoder::new(data_shards, tolerance)?,
            mode: StorageMode::ErasureCodingRs,
        })
    }

    /// Record a different (Reed-Solomon based) mode on the codec.
    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    fn slots(&self, fragments: &BTreeMap<usize, Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>> {
        check_fragment_map(fragments, self.fragment_count(), self.required_fragments())?;
        Ok((0..self.fragment_count())
            .map(|slot| fragments.get(&slot).cloned())
            .collect())
    }
}

impl FragmentCodec for RsCodec {
    fn mode(&self) -> StorageMode {
        self.mode
    }

    fn fragment_count(&self) -> usize {
        self.encoder.total_shards()
    }

    fn required_fragments(&self) -> usize {
        self.encoder.data_shards()
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.encoder.encode(data)
    }

    #[instrument(skip(self, fragments), fields(available = fragments.len()))]
    fn decode(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let mut slots = self.slots(fragments)?;
        self.decoder.decode(&mut slots, original_size)
    }

    #[instrument(skip(self, fragments), fields(available = fragments.len(), missing = missing.len()))]
    fn regenerate(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        _original_size: usize,
        missing: &[usize],
    ) -> Result<Vec<(usize, Vec<u8>)>> {
        let mut slots = self.slots(fragments)?;
        self.decoder.reconstruct(&mut slots)?;

        missing
            .iter()
            .map(|&slot| {
                slots
                    .get_mut(slot)
                    .and_then(Option::take)
                    .map(|bytes| (slot, bytes))
                    .ok_or_else(|| {
                        Error::InvalidParameter(format!("fragment slot {} out of range", slot))
                    })
            })
            .collect()
    }
}
