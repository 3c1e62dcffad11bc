//! Property-Based Tests for Erasure Coding
//!
//! Uses proptest to verify codec correctness across cluster sizes,
//! tolerances, payload sizes and erasure patterns.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decode(encode(data)) = data
//! 2. **Shard Independence**: any N−t fragments rebuild the data
//! 3. **Failure Mode**: N−t−1 fragments yield `InsufficientShards`
//! 4. **Repair**: regenerated fragments decode like the originals

#![cfg(test)]

use std::collections::BTreeMap;

use proptest::prelude::*;

use super::build_codec;
use crate::domain::ports::CodingParams;
use crate::error::Error;
use crate::fragment::{join_chunks, split_chunks};

// =============================================================================
// Property Strategies
// =============================================================================

/// Cluster size N and tolerance t < N.
fn cluster_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=8).prop_flat_map(|n| (Just(n), 0..n))
}

/// Cluster shape plus a set of exactly N−t surviving slots.
fn survivors_strategy() -> impl Strategy<Value = (usize, usize, Vec<usize>)> {
    cluster_strategy().prop_flat_map(|(n, t)| {
        (
            Just(n),
            Just(t),
            prop::sample::subsequence((0..n).collect::<Vec<_>>(), n - t),
        )
    })
}

/// Strategy for generating small test data for faster tests.
fn small_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..1000)
}

fn keep(fragments: &[Vec<u8>], slots: &[usize]) -> BTreeMap<usize, Vec<u8>> {
    slots.iter().map(|&s| (s, fragments[s].clone())).collect()
}

// =============================================================================
// Reed-Solomon Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Encoding then decoding without any losses returns the original data.
    #[test]
    fn prop_rs_roundtrip_no_loss(
        (n, t) in cluster_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = build_codec(&CodingParams::rs(t), n)?;
        let fragments = codec.encode(&data)?;
        prop_assert_eq!(fragments.len(), n);

        let all: BTreeMap<usize, Vec<u8>> = fragments.into_iter().enumerate().collect();
        let recovered = codec.decode(&all, data.len())?;
        prop_assert_eq!(recovered, data, "Roundtrip failed for N={}, t={}", n, t);
    }

    /// Property: Any N−t fragments reconstruct the original data.
    #[test]
    fn prop_rs_any_subset_of_k(
        (n, t, slots) in survivors_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = build_codec(&CodingParams::rs(t), n)?;
        let fragments = codec.encode(&data)?;

        let recovered = codec.decode(&keep(&fragments, &slots), data.len())?;
        prop_assert_eq!(recovered, data, "Recovery failed for N={}, t={}, slots={:?}", n, t, slots);
    }

    /// Property: N−t−1 fragments are never enough.
    #[test]
    fn prop_rs_one_too_few_fails(
        (n, t, slots) in survivors_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = build_codec(&CodingParams::rs(t), n)?;
        let fragments = codec.encode(&data)?;

        let result = codec.decode(&keep(&fragments, &slots[1..]), data.len());
        let is_insufficient = matches!(result, Err(Error::InsufficientShards { .. }));
        prop_assert!(is_insufficient, "N={}, t={} decoded from {} fragments", n, t, slots.len() - 1);
    }

    /// Property: Regenerated fragments are byte-identical to the lost ones.
    #[test]
    fn prop_rs_regenerate_identical(
        (n, t, slots) in survivors_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = build_codec(&CodingParams::rs(t), n)?;
        let fragments = codec.encode(&data)?;
        let missing: Vec<usize> = (0..n).filter(|s| !slots.contains(s)).collect();

        let regenerated = codec.regenerate(&keep(&fragments, &slots), data.len(), &missing)?;
        prop_assert_eq!(regenerated.len(), missing.len());
        for (slot, bytes) in regenerated {
            prop_assert_eq!(&bytes, &fragments[slot]);
        }
    }
}

// =============================================================================
// RLNC and RAID1 Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: Any N−t RLNC fragments decode, for every subfragment count.
    #[test]
    fn prop_rlnc_any_subset_of_k(
        (n, t, slots) in survivors_strategy(),
        per_node in 1usize..=3,
        data in small_data_strategy(),
    ) {
        let codec = build_codec(&CodingParams::rlnc(t, per_node), n)?;
        let fragments = codec.encode(&data)?;

        let recovered = codec.decode(&keep(&fragments, &slots), data.len())?;
        prop_assert_eq!(recovered, data);
    }

    /// Property: One surviving copy of each half rebuilds a RAID1 file.
    #[test]
    fn prop_raid1_one_copy_each(
        pairs in 1usize..=4,
        first in 0usize..4,
        second in 0usize..4,
        data in small_data_strategy(),
    ) {
        let n = pairs * 2;
        let codec = build_codec(&CodingParams::raid1(), n)?;
        let fragments = codec.encode(&data)?;

        let even = (first % pairs) * 2;
        let odd = (second % pairs) * 2 + 1;
        let recovered = codec.decode(&keep(&fragments, &[even, odd]), data.len())?;
        prop_assert_eq!(recovered, data);
    }

    /// Property: Splitting a fragment into chunks and joining them is lossless.
    #[test]
    fn prop_chunks_rejoin(
        count in 1usize..=10,
        chunk_len in 1usize..64,
        seed in any::<u8>(),
    ) {
        let fragment: Vec<u8> = (0..count * chunk_len)
            .map(|i| (i as u8).wrapping_mul(seed))
            .collect();

        let chunks = split_chunks(&fragment, count)?;
        prop_assert_eq!(chunks.len(), count);
        prop_assert_eq!(join_chunks(&chunks), fragment);
    }
}
