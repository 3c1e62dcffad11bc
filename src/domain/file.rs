//! File metadata records.
//!
//! The storage details are kept in the same JSON shape the metadata store has
//! always used, so records written by earlier deployments stay readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::{CodingParams, FileId, StorageMode};
use crate::fragment::FragmentId;

/// Opaque per-mode descriptor stored alongside a file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageDetails {
    /// Reed-Solomon and RLNC: fragment ids in slot order
    Coded {
        coded_fragments: Vec<FragmentId>,
        max_erasures: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subfragments_per_node: Option<usize>,
    },
    /// RAID1: even slots hold the first half, odd slots the second
    Mirrored {
        part1_filenames: Vec<FragmentId>,
        part2_filenames: Vec<FragmentId>,
    },
}

impl StorageDetails {
    /// Describe a freshly stored file.
    pub fn for_fragments(params: &CodingParams, ids: &[FragmentId]) -> Self {
        match params.mode {
            StorageMode::Raid1 => StorageDetails::Mirrored {
                part1_filenames: ids.iter().step_by(2).cloned().collect(),
                part2_filenames: ids.iter().skip(1).step_by(2).cloned().collect(),
            },
            StorageMode::ErasureCodingRlnc => StorageDetails::Coded {
                coded_fragments: ids.to_vec(),
                max_erasures: params.max_erasures,
                subfragments_per_node: Some(params.subfragments_per_node),
            },
            StorageMode::ErasureCodingRs | StorageMode::ErasureCodingRsRandomWorker => {
                StorageDetails::Coded {
                    coded_fragments: ids.to_vec(),
                    max_erasures: params.max_erasures,
                    subfragments_per_node: None,
                }
            }
        }
    }

    /// Fragment ids in slot order.
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        match self {
            StorageDetails::Coded {
                coded_fragments, ..
            } => coded_fragments.clone(),
            StorageDetails::Mirrored {
                part1_filenames,
                part2_filenames,
            } => {
                let mut ids = Vec::with_capacity(part1_filenames.len() + part2_filenames.len());
                let mut part1 = part1_filenames.iter();
                let mut part2 = part2_filenames.iter();
                loop {
                    match (part1.next(), part2.next()) {
                        (None, None) => break,
                        (a, b) => ids.extend(a.into_iter().chain(b).cloned()),
                    }
                }
                ids
            }
        }
    }

    /// Codec parameters the file was stored with.
    pub fn coding_params(&self, mode: StorageMode) -> CodingParams {
        match self {
            StorageDetails::Coded {
                max_erasures,
                subfragments_per_node,
                ..
            } => CodingParams {
                mode,
                max_erasures: *max_erasures,
                subfragments_per_node: subfragments_per_node.unwrap_or(1),
            },
            StorageDetails::Mirrored { .. } => CodingParams::raid1().with_mode(mode),
        }
    }
}

/// A stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    pub storage_mode: StorageMode,
    pub storage_details: StorageDetails,
    pub created: DateTime<Utc>,
}

impl FileRecord {
    /// Parameters needed to rebuild a codec for this file.
    pub fn coding_params(&self) -> CodingParams {
        self.storage_details.coding_params(self.storage_mode)
    }

    /// Fragment ids in slot order.
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        self.storage_details.fragment_ids()
    }
}

/// A record about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    pub storage_mode: StorageMode,
    pub storage_details: StorageDetails,
}

impl NewFileRecord {
    /// Stamp the record with an id and creation time.
    pub fn into_record(self, id: FileId) -> FileRecord {
        FileRecord {
            id,
            file_name: self.file_name,
            size: self.size,
            content_type: self.content_type,
            storage_mode: self.storage_mode,
            storage_details: self.storage_details,
            created: Utc::now(),
        }
    }
}
