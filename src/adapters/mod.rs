//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │          FragmentCodec          │       FileRepository     │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  RsCodec │ Raid1Codec │ RlncCodec                          │ │
//! │  │  InMemoryFileRepository │ JsonFileRepository               │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use shardstore::adapters::RsCodec;
//! use shardstore::domain::FragmentCodec;
//!
//! let codec = RsCodec::new(4, 1)?;
//! let fragments = codec.encode(b"hello")?;
//! ```

mod file_repository;
mod raid1;
mod reed_solomon;
mod rlnc;

pub use file_repository::{InMemoryFileRepository, JsonFileRepository};
pub use raid1::Raid1Codec;
pub use reed_solomon::RsCodec;
pub use rlnc::RlncCodec;
