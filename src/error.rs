//! Error types for the shardstore coordinator and storage nodes

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, retrieving or repairing fragments
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Coding parameters or input rejected before any work was done
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Fewer fragments than the codec needs to rebuild the data
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// A fragment failed validation (length, index or linear dependence)
    #[error("Corrupt shard: {0}")]
    CorruptShard(String),

    /// The underlying coding library failed
    #[error("Encoding error: {0}")]
    EncodingError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Header carried a request type code this build does not know
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    /// A known message arrived on a channel that does not carry it
    #[error("Unexpected {request_type} message on {channel} channel")]
    UnexpectedMessage {
        channel: &'static str,
        request_type: String,
    },

    /// Malformed multipart message
    #[error("Protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    /// A node did not answer within the deadline, even after one retry
    #[error("Node {node} unresponsive during {operation}")]
    NodeUnresponsive { node: usize, operation: String },

    /// A delegated worker reported that it could not place the fragments
    #[error("Delegated store on node {node} failed: {reason}")]
    DelegationFailed { node: usize, reason: String },

    /// Too many messages are waiting for a connection that is not draining
    #[error("Outbound queue of {channel} channel to {target} is full ({capacity} messages)")]
    QueueFull {
        channel: &'static str,
        target: String,
        capacity: usize,
    },

    /// A chunk with this name already exists with different content
    #[error("Fragment {fragment} chunk {chunk} already exists with different content")]
    FragmentConflict { fragment: String, chunk: usize },

    /// No metadata record for the requested file
    #[error("File not found: {0}")]
    FileNotFound(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Metadata document error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure was caused by a missing or silent node
    pub fn is_node_failure(&self) -> bool {
        matches!(
            self,
            Error::NodeUnresponsive { .. }
                | Error::DelegationFailed { .. }
                | Error::QueueFull { .. }
        )
    }

    /// Whether the error was raised while validating caller input
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidParameter(_) | Error::Config(_))
    }
}
