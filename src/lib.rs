//! Shardstore - Erasure-Coded Distributed Object Store
//!
//! A lead coordinator splits whole files into redundant fragments, scatters
//! one fragment to each of `N` storage nodes and later rebuilds the file from
//! any sufficient subset. A repair pass regenerates fragments lost to node
//! failure.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────────────┐
//!  file ───────► │           Coordinator             │ ◄──── FileRepository
//!                │  store │ retrieve │ repair        │       (metadata port)
//!                └───┬────────▲──────────┬──────────┘
//!                    │ tasks  │ results  │ broadcast
//!          ┌─────────▼────────┴──────────▼─────────┐
//!          │  StorageNode 0 … StorageNode N-1       │ ◄─► peer channel
//!          │  <data_dir>/<i>/<fragment>.<chunk>     │
//!          └───────────────────────────────────────┘
//! ```
//!
//! # Storage Modes
//!
//! - `raid1` - two halves mirrored over node pairs
//! - `erasure_coding_rs` - Reed-Solomon, encoded by the coordinator
//! - `erasure_coding_rs_random_worker` - Reed-Solomon, encoded by a random node
//! - `erasure_coding_rlnc` - random linear network coding over GF(2^8)
//!
//! # Modules
//!
//! - [`adapters`] - Codec and metadata-store adapters implementing domain ports
//! - [`config`] - Cluster configuration (addresses, node registry, timeouts)
//! - [`coordinator`] - Store, retrieve and repair flows
//! - [`domain`] - Domain layer with ports and file records
//! - [`ec`] - Erasure coding components
//! - [`error`] - Error types
//! - [`fragment`] - Fragment naming and on-disk chunk layout
//! - [`metrics`] - Prometheus counters and HTTP endpoint
//! - [`node`] - Storage node agent
//! - [`protocol`] - Typed wire messages
//! - [`transport`] - Framed multipart channels over TCP

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod ec;
pub mod error;
pub mod fragment;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use config::ClusterConfig;
pub use coordinator::{Coordinator, RepairReport};
pub use domain::{CodingParams, FileId, FileRecord, FileRepository, FragmentCodec, StorageMode};
pub use error::{Error, Result};
pub use fragment::FragmentId;
pub use node::{NodeHandle, StorageNode};
