//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the core abstractions (ports) that the coordinator and
//! storage nodes depend on. Adapters implement these traits to provide the
//! concrete codecs and metadata stores.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        FragmentCodec        │     FileRepository     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  RsCodec │ Raid1Codec │ RlncCodec │ JsonFileRepo    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::file::{FileRecord, NewFileRecord};
use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// How a file's fragments were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Two halves mirrored across node pairs
    Raid1,
    /// Reed-Solomon encoded by the coordinator
    ErasureCodingRs,
    /// Reed-Solomon encoded by a randomly chosen storage node
    ErasureCodingRsRandomWorker,
    /// Random linear network coding encoded by the coordinator
    ErasureCodingRlnc,
}

impl StorageMode {
    /// All modes, in declaration order.
    pub const ALL: [StorageMode; 4] = [
        StorageMode::Raid1,
        StorageMode::ErasureCodingRs,
        StorageMode::ErasureCodingRsRandomWorker,
        StorageMode::ErasureCodingRlnc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Raid1 => "raid1",
            StorageMode::ErasureCodingRs => "erasure_coding_rs",
            StorageMode::ErasureCodingRsRandomWorker => "erasure_coding_rs_random_worker",
            StorageMode::ErasureCodingRlnc => "erasure_coding_rlnc",
        }
    }

    /// Whether encoding happens on a storage node instead of the coordinator.
    pub fn is_delegated(&self) -> bool {
        matches!(self, StorageMode::ErasureCodingRsRandomWorker)
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StorageMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown storage mode: {}", s)))
    }
}

/// Everything needed to build a codec for a given cluster size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingParams {
    pub mode: StorageMode,
    /// Fragments that may be lost (ignored by RAID1, which derives it)
    pub max_erasures: usize,
    /// Coded subfragments per node (RLNC only)
    pub subfragments_per_node: usize,
}

impl CodingParams {
    /// Reed-Solomon parameters.
    pub fn rs(max_erasures: usize) -> Self {
        Self {
            mode: StorageMode::ErasureCodingRs,
            max_erasures,
            subfragments_per_node: 1,
        }
    }

    /// RLNC parameters.
    pub fn rlnc(max_erasures: usize, subfragments_per_node: usize) -> Self {
        Self {
            mode: StorageMode::ErasureCodingRlnc,
            max_erasures,
            subfragments_per_node,
        }
    }

    /// RAID1 parameters.
    pub fn raid1() -> Self {
        Self {
            mode: StorageMode::Raid1,
            max_erasures: 0,
            subfragments_per_node: 1,
        }
    }

    /// Same parameters with a different mode.
    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Metadata record identifier (value object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Fragment Codec Port
// =============================================================================

/// Port for erasure coding a file into one fragment per storage node.
///
/// Fragment slot `i` is always placed on node `i`. Maps passed to `decode`
/// and `regenerate` are keyed by slot.
pub trait FragmentCodec: Send + Sync + std::fmt::Debug {
    /// Mode this codec implements.
    fn mode(&self) -> StorageMode;

    /// Number of fragments produced (N).
    fn fragment_count(&self) -> usize;

    /// Minimum number of distinct fragments needed to decode (k).
    fn required_fragments(&self) -> usize;

    /// Fragments that may be lost while the file stays recoverable.
    fn tolerance(&self) -> usize {
        self.fragment_count() - self.required_fragments()
    }

    /// Chunks each fragment is split into on the wire and on disk.
    fn chunks_per_fragment(&self) -> usize {
        1
    }

    /// Encode a non-empty buffer into `fragment_count()` fragments.
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Rebuild exactly `original_size` bytes from surviving fragments.
    fn decode(&self, fragments: &BTreeMap<usize, Vec<u8>>, original_size: usize)
        -> Result<Vec<u8>>;

    /// Regenerate the `missing` slots from surviving fragments.
    fn regenerate(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        original_size: usize,
        missing: &[usize],
    ) -> Result<Vec<(usize, Vec<u8>)>>;
}

/// Shared fragment-map validation: slot range and survivor count.
pub fn check_fragment_map(
    fragments: &BTreeMap<usize, Vec<u8>>,
    fragment_count: usize,
    required: usize,
) -> Result<()> {
    if let Some(slot) = fragments.keys().find(|&&slot| slot >= fragment_count) {
        return Err(Error::CorruptShard(format!(
            "fragment slot {} out of range for {} fragments",
            slot, fragment_count
        )));
    }
    if fragments.len() < required {
        return Err(Error::InsufficientShards {
            available: fragments.len(),
            required,
        });
    }
    Ok(())
}

// =============================================================================
// File Repository Port
// =============================================================================

/// Port for the file metadata store.
///
/// A record is created only after every fragment of the file was
/// acknowledged, so anything returned here is retrievable as long as enough
/// fragments survive.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Persist a new record and return its identifier.
    async fn create_record(&self, record: NewFileRecord) -> Result<FileId>;

    /// Look up one record.
    async fn get_record(&self, id: &FileId) -> Result<Option<FileRecord>>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<FileRecord>>;

    /// Records stored with the given mode.
    async fn list_by_storage_mode(&self, mode: StorageMode) -> Result<Vec<FileRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.storage_mode == mode)
            .collect())
    }
}
