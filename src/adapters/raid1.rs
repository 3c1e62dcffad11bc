//! RAID1 Codec Adapter
//!
//! Splits a file into two halves and mirrors them across node pairs: even
//! slots hold the first half, odd slots the second.

use std::collections::BTreeMap;

use crate::domain::ports::{check_fragment_map, FragmentCodec, StorageMode};
use crate::error::{Error, Result};

/// Number of parts a file is split into
const PARTS: usize = 2;

/// Mirrored two-part layout.
#[derive(Debug, Clone)]
pub struct Raid1Codec {
    node_count: usize,
}

impl Raid1Codec {
    /// Create a RAID1 codec for an even number of nodes.
    pub fn new(node_count: usize) -> Result<Self> {
        if node_count < PARTS || node_count % PARTS != 0 {
            return Err(Error::InvalidParameter(format!(
                "raid1 needs an even node count of at least {}, got {}",
                PARTS, node_count
            )));
        }
        Ok(Self { node_count })
    }

    /// Number of copies of each half.
    pub fn copies(&self) -> usize {
        self.node_count / PARTS
    }

    /// Pick one surviving copy of each half.
    fn halves<'a>(&self, fragments: &'a BTreeMap<usize, Vec<u8>>) -> Result<[&'a Vec<u8>; PARTS]> {
        check_fragment_map(fragments, self.node_count, PARTS)?;

        let mut lengths = fragments.values().map(Vec::len);
        if let Some(first) = lengths.next() {
            if lengths.any(|len| len != first) {
                return Err(Error::CorruptShard(
                    "mirror lengths are inconsistent".to_string(),
                ));
            }
        }

        let find = |part: usize| {
            fragments
                .iter()
                .find(|(slot, _)| *slot % PARTS == part)
                .map(|(_, bytes)| bytes)
                .ok_or(Error::InsufficientShards {
                    available: fragments.len(),
                    required: PARTS,
                })
        };
        Ok([find(0)?, find(1)?])
    }
}

impl FragmentCodec for Raid1Codec {
    fn mode(&self) -> StorageMode {
        StorageMode::Raid1
    }

    fn fragment_count(&self) -> usize {
        self.node_count
    }

    fn required_fragments(&self) -> usize {
        PARTS
    }

    fn tolerance(&self) -> usize {
        self.copies() - 1
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot encode an empty buffer".to_string(),
            ));
        }

        let half = data.len().div_ceil(PARTS);
        let first = data[..half].to_vec();
        let mut second = data[half..].to_vec();
        second.resize(half, 0);

        Ok((0..self.node_count)
            .map(|slot| {
                if slot % PARTS == 0 {
                    first.clone()
                } else {
                    second.clone()
                }
            })
            .collect())
    }

    fn decode(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let [first, second] = self.halves(fragments)?;

        let mut data = Vec::with_capacity(first.len() + second.len());
        data.extend_from_slice(first);
        data.extend_from_slice(second);
        if data.len() < original_size {
            return Err(Error::CorruptShard(format!(
                "mirrors hold {} bytes, expected at least {}",
                data.len(),
                original_size
            )));
        }
        data.truncate(original_size);
        Ok(data)
    }

    fn regenerate(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        _original_size: usize,
        missing: &[usize],
    ) -> Result<Vec<(usize, Vec<u8>)>> {
        let halves = self.halves(fragments)?;
        missing
            .iter()
            .map(|&slot| {
                if slot >= self.node_count {
                    return Err(Error::InvalidParameter(format!(
                        "fragment slot {} out of range",
                        slot
                    )));
                }
                Ok((slot, halves[slot % PARTS].clone()))
            })
            .collect()
    }
}
