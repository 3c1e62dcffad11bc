//! Domain Layer
//!
//! This module contains the core domain types following Domain-Driven Design principles.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Codec and metadata-store abstractions plus value objects
//! - **Files** (`file.rs`) - File records and their per-mode storage descriptors
//!
//! # Usage
//!
//! ```ignore
//! use shardstore::domain::{CodingParams, FileRepository};
//!
//! async fn describe<R: FileRepository>(repo: &R) -> Result<()> {
//!     for record in repo.list().await? {
//!         println!("{} {}", record.id, record.coding_params().mode);
//!     }
//!     Ok(())
//! }
//! ```

pub mod file;
pub mod ports;

pub use file::{FileRecord, NewFileRecord, StorageDetails};
pub use ports::{
    check_fragment_map, CodingParams, FileId, FileRepository, FragmentCodec, StorageMode,
};
