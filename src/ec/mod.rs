//! Erasure Coding Module
//!
//! This module turns a file into one fragment per storage node and back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Erasure Coding Module                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐    ┌──────────────┐    ┌───────────────────────────┐  │
//! │  │ Reed-Solomon │    │    RAID1     │    │   RLNC (GF(2^8) linear    │  │
//! │  │   Encoder    │    │   mirrors    │    │   algebra, coefficients)  │  │
//! │  └──────────────┘    └──────────────┘    └───────────────────────────┘  │
//! │         │                   │                         │                  │
//! │         └───────────────────┼─────────────────────────┘                  │
//! │                             │                                            │
//! │                   ┌─────────┴─────────┐                                  │
//! │                   │    build_codec    │  → Box<dyn FragmentCodec>        │
//! │                   └───────────────────┘                                  │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Encoder/Decoder** (`encoder.rs`): Reed-Solomon encoding and decoding
//!   using the `reed-solomon-erasure` crate.
//! - **RLNC** (`rlnc.rs`): coded symbols, Gauss-Jordan decoding and
//!   coefficient sampling with a decodability check.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shardstore::domain::CodingParams;
//! use shardstore::ec::build_codec;
//!
//! let codec = build_codec(&CodingParams::rs(1), 4)?;
//! let fragments = codec.encode(b"Hello, World!")?;
//!
//! let survivors = fragments.into_iter().enumerate().skip(1).collect();
//! let recovered = codec.decode(&survivors, 13)?;
//! assert_eq!(recovered, b"Hello, World!");
//! ```

pub mod encoder;
pub mod rlnc;

#[cfg(test)]
mod proptest;

use crate::adapters::{Raid1Codec, RlncCodec, RsCodec};
use crate::domain::ports::{CodingParams, FragmentCodec, StorageMode};
use crate::error::{Error, Result};
use crate::protocol::MAX_DATA_FRAMES;

pub use encoder::{EcDecoder, EcEncoder};

/// Build the codec for a storage mode on a cluster of `node_count` nodes.
///
/// All parameter validation happens here, before anything touches the network.
pub fn build_codec(params: &CodingParams, node_count: usize) -> Result<Box<dyn FragmentCodec>> {
    if node_count == 0 {
        return Err(Error::InvalidParameter(
            "cluster has no storage nodes".to_string(),
        ));
    }

    Ok(match params.mode {
        StorageMode::Raid1 => Box::new(Raid1Codec::new(node_count)?),
        StorageMode::ErasureCodingRs | StorageMode::ErasureCodingRsRandomWorker => {
            Box::new(RsCodec::new(node_count, params.max_erasures)?.with_mode(params.mode))
        }
        StorageMode::ErasureCodingRlnc => Box::new(RlncCodec::new(
            node_count,
            params.max_erasures,
            params.subfragments_per_node,
        )?),
    })
}

/// Like [`build_codec`], also enforcing the per-fragment chunk limit.
///
/// The limit never exceeds the data frames one message can carry.
pub fn build_codec_with_limit(
    params: &CodingParams,
    node_count: usize,
    max_chunks_per_file: usize,
) -> Result<Box<dyn FragmentCodec>> {
    let codec = build_codec(params, node_count)?;
    let limit = max_chunks_per_file.min(MAX_DATA_FRAMES);
    if codec.chunks_per_fragment() > limit {
        return Err(Error::InvalidParameter(format!(
            "{} chunks per fragment exceeds the limit of {}",
            codec.chunks_per_fragment(),
            limit
        )));
    }
    Ok(codec)
}
