//! RLNC Codec Adapter
//!
//! Implements the `FragmentCodec` port with random linear network coding.
//! Each fragment holds `s` coded subfragments, and each subfragment travels
//! and is stored as its own chunk.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::domain::ports::{check_fragment_map, FragmentCodec, StorageMode};
use crate::ec::rlnc::{combine, solve, CodedSymbol, RlncLayout};
use crate::error::{Error, Result};

/// Random linear network coding over GF(2^8).
#[derive(Debug, Clone)]
pub struct RlncCodec {
    layout: RlncLayout,
}

impl RlncCodec {
    /// Create an RLNC codec.
    ///
    /// # Arguments
    /// * `node_count` - Number of fragments, one per node (N)
    /// * `tolerance` - Fragments that may be lost (t < N)
    /// * `subfragments_per_node` - Coded subfragments in each fragment (s ≥ 1)
    pub fn new(node_count: usize, tolerance: usize, subfragments_per_node: usize) -> Result<Self> {
        if tolerance >= node_count {
            return Err(Error::InvalidParameter(format!(
                "tolerance {} must be smaller than the node count {}",
                tolerance, node_count
            )));
        }
        if subfragments_per_node == 0 {
            return Err(Error::InvalidParameter(
                "subfragments_per_node must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            layout: RlncLayout {
                nodes: node_count,
                required_nodes: node_count - tolerance,
                per_node: subfragments_per_node,
            },
        })
    }

    /// Split a fragment into its coded subfragments.
    fn parse_fragment(&self, bytes: &[u8]) -> Result<Vec<CodedSymbol>> {
        let per_node = self.layout.per_node;
        if bytes.is_empty() || bytes.len() % per_node != 0 {
            return Err(Error::CorruptShard(format!(
                "fragment of {} bytes does not hold {} equal subfragments",
                bytes.len(),
                per_node
            )));
        }
        bytes
            .chunks(bytes.len() / per_node)
            .map(|sub| CodedSymbol::parse(sub, self.layout.generation()))
            .collect()
    }

    /// Parse every fragment and recover the source symbols.
    fn solve_fragments(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
    ) -> Result<(Vec<Vec<u8>>, BTreeMap<usize, Vec<CodedSymbol>>)> {
        check_fragment_map(fragments, self.layout.nodes, self.layout.required_nodes)?;

        let mut lengths = fragments.values().map(Vec::len);
        if let Some(first) = lengths.next() {
            if lengths.any(|len| len != first) {
                return Err(Error::CorruptShard(
                    "fragment lengths are inconsistent".to_string(),
                ));
            }
        }

        let parsed = fragments
            .iter()
            .map(|(slot, bytes)| Ok((*slot, self.parse_fragment(bytes)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let symbols: Vec<CodedSymbol> = parsed.values().flatten().cloned().collect();

        let sources = solve(&symbols, self.layout.generation())?;
        Ok((sources, parsed))
    }

    /// Build one fragment from its coefficient rows.
    fn build_fragment(rows: &[Vec<u8>], sources: &[Vec<u8>]) -> Vec<u8> {
        rows.iter()
            .flat_map(|coefficients| {
                CodedSymbol {
                    coefficients: coefficients.clone(),
                    payload: combine(coefficients, sources),
                }
                .to_bytes()
            })
            .collect()
    }
}

impl FragmentCodec for RlncCodec {
    fn mode(&self) -> StorageMode {
        StorageMode::ErasureCodingRlnc
    }

    fn fragment_count(&self) -> usize {
        self.layout.nodes
    }

    fn required_fragments(&self) -> usize {
        self.layout.required_nodes
    }

    fn chunks_per_fragment(&self) -> usize {
        self.layout.per_node
    }

    #[instrument(skip(self, data), fields(data_len = data.len()))]
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot encode an empty buffer".to_string(),
            ));
        }

        let sources = self.layout.split_sources(data);
        let rows = self.layout.draw_rows(&mut rand::thread_rng(), &[])?;

        debug!(
            generation = self.layout.generation(),
            symbol_size = self.layout.symbol_size(data.len()),
            "Encoded RLNC generation"
        );

        Ok(rows
            .iter()
            .map(|node_rows| Self::build_fragment(node_rows, &sources))
            .collect())
    }

    fn decode(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        original_size: usize,
    ) -> Result<Vec<u8>> {
        let (sources, _) = self.solve_fragments(fragments)?;

        let mut data: Vec<u8> = sources.into_iter().flatten().collect();
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

    /// Regenerated fragments carry fresh coefficients, drawn so that any `k`
    /// slots of the repaired set still decode.
    #[instrument(skip(self, fragments), fields(available = fragments.len(), missing = missing.len()))]
    fn regenerate(
        &self,
        fragments: &BTreeMap<usize, Vec<u8>>,
        _original_size: usize,
        missing: &[usize],
    ) -> Result<Vec<(usize, Vec<u8>)>> {
        if let Some(slot) = missing.iter().find(|&&slot| slot >= self.layout.nodes) {
            return Err(Error::InvalidParameter(format!(
                "fragment slot {} out of range",
                slot
            )));
        }

        let (sources, parsed) = self.solve_fragments(fragments)?;
        let fixed: Vec<Option<Vec<Vec<u8>>>> = (0..self.layout.nodes)
            .map(|slot| {
                parsed.get(&slot).map(|symbols| {
                    symbols
                        .iter()
                        .map(|s| s.coefficients.clone())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let rows = self.layout.draw_rows(&mut rand::thread_rng(), &fixed)?;
        Ok(missing
            .iter()
            .map(|&slot| (slot, Self::build_fragment(&rows[slot], &sources)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(codec: &RlncCodec, data: &[u8]) -> BTreeMap<usize, Vec<u8>> {
        codec.encode(data).unwrap().into_iter().enumerate().collect()
    }

    #[test]
    fn test_fragment_shape() {
        let codec = RlncCodec::new(4, 1, 2).unwrap();
        let data = vec![42u8; 100];
        let fragments = codec.encode(&data).unwrap();

        // generation of 6 symbols of 17 bytes, each prefixed by 6 coefficients
        assert_eq!(fragments.len(), 4);
        assert!(fragments.iter().all(|f| f.len() == 2 * (6 + 17)));
        assert_eq!(codec.chunks_per_fragment(), 2);
    }

    #[test]
    fn test_any_k_fragments_decode() {
        let codec = RlncCodec::new(4, 2, 3).unwrap();
        let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let all = encode_all(&codec, &data);

        for a in 0..4 {
            for b in (a + 1)..4 {
                let pair: BTreeMap<usize, Vec<u8>> =
                    [(a, all[&a].clone()), (b, all[&b].clone())].into();
                assert_eq!(codec.decode(&pair, data.len()).unwrap(), data);
            }
        }
    }

    #[test]
    fn test_too_few_fragments() {
        let codec = RlncCodec::new(4, 1, 1).unwrap();
        let mut fragments = encode_all(&codec, b"rlnc data");
        fragments.remove(&0);
        fragments.remove(&1);

        assert!(matches!(
            codec.decode(&fragments, 9),
            Err(Error::InsufficientShards {
                available: 2,
                required: 3
            })
        ));
    }

    #[test]
    fn test_regenerate_keeps_file_decodable() {
        let codec = RlncCodec::new(4, 1, 2).unwrap();
        let data = b"network coded payload that gets repaired".to_vec();
        let mut fragments = encode_all(&codec, &data);
        fragments.remove(&1);

        let regenerated = codec.regenerate(&fragments, data.len(), &[1]).unwrap();
        assert_eq!(regenerated.len(), 1);
        let (slot, bytes) = regenerated.into_iter().next().unwrap();
        assert_eq!(slot, 1);

        // the new fragment must combine with any two survivors
        fragments.insert(1, bytes);
        for dropped in [0, 2, 3] {
            let mut subset = fragments.clone();
            subset.remove(&dropped);
            assert_eq!(codec.decode(&subset, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(RlncCodec::new(4, 4, 1).is_err());
        assert!(RlncCodec::new(4, 1, 0).is_err());
        assert!(RlncCodec::new(4, 1, 1).unwrap().encode(&[]).is_err());
    }

    #[test]
    fn test_corrupt_fragment_length() {
        let codec = RlncCodec::new(4, 1, 2).unwrap();
        let mut fragments = encode_all(&codec, b"some bytes to code");
        fragments.get_mut(&0).unwrap().pop();

        assert!(matches!(
            codec.decode(&fragments, 18),
            Err(Error::CorruptShard(_))
        ));
    }
}
