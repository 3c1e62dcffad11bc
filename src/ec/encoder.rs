//! Reed-Solomon Encoder/Decoder
//!
//! Implements Reed-Solomon encoding and decoding using the `reed-solomon-erasure` crate.
//! A file is padded to a multiple of `k`, split into `k` data shards and extended
//! with `m` parity shards; any `k` of the `k + m` shards rebuild the file.

use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Build the shared codec instance; `None` when there is no parity to compute.
fn build_rs(data_shards: usize, parity_shards: usize) -> Result<Option<Arc<ReedSolomon>>> {
    if data_shards == 0 {
        return Err(Error::InvalidParameter(
            "data_shards must be greater than 0".to_string(),
        ));
    }
    if parity_shards == 0 {
        return Ok(None);
    }

    let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
        Error::InvalidParameter(format!("Failed to create Reed-Solomon codec: {}", e))
    })?;
    Ok(Some(Arc::new(rs)))
}

// =============================================================================
// EC Encoder
// =============================================================================

/// Erasure coding encoder for creating parity shards from data shards
#[derive(Clone)]
pub struct EcEncoder {
    /// Reed-Solomon codec instance (absent for a plain k+0 split)
    rs: Option<Arc<ReedSolomon>>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl EcEncoder {
    /// Create a new encoder with the specified k+m configuration
    ///
    /// # Arguments
    /// * `data_shards` - Number of data shards (k)
    /// * `parity_shards` - Number of parity shards (m), may be zero
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            rs: build_rs(data_shards, parity_shards)?,
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Encode data into shards (data + parity)
    ///
    /// The input is zero-padded so that it divides evenly into `k` shards.
    ///
    /// # Returns
    /// Vector of shards (data shards followed by parity shards)
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot encode an empty buffer".to_string(),
            ));
        }

        let shard_size = calculate_shard_size(data.len(), self.data_shards);
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for i in 0..self.data_shards {
            let start = i * shard_size;
            let end = std::cmp::min(start + shard_size, data.len());

            let mut shard = if start < data.len() {
                data[start..end].to_vec()
            } else {
                Vec::new()
            };
            shard.resize(shard_size, 0);
            shards.push(shard);
        }

        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; shard_size]);
        }

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards).map_err(|e| {
                Error::EncodingError(format!("Reed-Solomon encoding failed: {}", e))
            })?;
        }

        debug!(
            "Encoded {} bytes into {} shards of {} bytes each",
            data.len(),
            self.total_shards(),
            shard_size
        );

        Ok(shards)
    }
}

// =============================================================================
// EC Decoder
// =============================================================================

/// Erasure coding decoder for reconstructing missing shards
#[derive(Clone)]
pub struct EcDecoder {
    rs: Option<Arc<ReedSolomon>>,
    data_shards: usize,
    parity_shards: usize,
}

impl EcDecoder {
    /// Create a new decoder with the specified k+m configuration
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            rs: build_rs(data_shards, parity_shards)?,
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Check slot count, survivor count and shard length consistency
    fn check_shards(&self, shards: &[Option<Vec<u8>>]) -> Result<usize> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidParameter(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }

        let mut lengths = shards.iter().flatten().map(Vec::len);
        if let Some(first) = lengths.next() {
            if first == 0 || lengths.any(|len| len != first) {
                return Err(Error::CorruptShard(
                    "shard lengths are inconsistent".to_string(),
                ));
            }
        }

        Ok(available)
    }

    /// Reconstruct every missing shard, data and parity alike
    ///
    /// At least k shards must be present for reconstruction to succeed.
    #[instrument(skip(self, shards))]
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        let available = self.check_shards(shards)?;

        if let Some(rs) = &self.rs {
            rs.reconstruct(shards).map_err(|e| {
                Error::EncodingError(format!("Reed-Solomon reconstruction failed: {}", e))
            })?;
        }

        debug!(
            "Reconstructed shards from {}/{} available",
            available,
            self.total_shards()
        );

        Ok(())
    }

    /// Reconstruct only the data shards (skip parity reconstruction)
    #[instrument(skip(self, shards))]
    pub fn reconstruct_data(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_shards(shards)?;

        if let Some(rs) = &self.rs {
            rs.reconstruct_data(shards).map_err(|e| {
                Error::EncodingError(format!("Reed-Solomon data reconstruction failed: {}", e))
            })?;
        }

        Ok(())
    }

    /// Decode shards back to original data
    ///
    /// Reconstructs missing data shards if necessary, then concatenates them
    /// and strips the padding.
    ///
    /// # Arguments
    /// * `shards` - Vector of optional shards, indexed by slot
    /// * `original_size` - Size of the original data (to trim padding)
    #[instrument(skip(self, shards), fields(original_size))]
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>], original_size: usize) -> Result<Vec<u8>> {
        self.reconstruct_data(shards)?;

        let mut data = Vec::with_capacity(original_size);
        for s in shards.iter().take(self.data_shards).flatten() {
            data.extend_from_slice(s);
        }

        if data.len() < original_size {
            return Err(Error::CorruptShard(format!(
                "decoded {} bytes, expected at least {}",
                data.len(),
                original_size
            )));
        }
        data.truncate(original_size);

        Ok(data)
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Calculate the shard size for given data size and shard count
pub fn calculate_shard_size(data_size: usize, data_shards: usize) -> usize {
    data_size.div_ceil(data_shards)
}

/// Calculate storage overhead ratio (total/data)
pub fn storage_overhead(data_shards: usize, parity_shards: usize) -> f64 {
    (data_shards + parity_shards) as f64 / data_shards as f64
}

// =============================================================================
// Tests
// =============================================================================
