//! Storage node: one long-running agent per node directory.

pub mod agent;
pub mod identity;

pub use agent::{NodeHandle, StorageNode};
pub use identity::NodeIdentity;
