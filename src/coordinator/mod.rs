//! Coordinator
//!
//! Owns the coordinator side of every channel and runs store, retrieve and
//! repair against the storage nodes. Operations run one at a time; each
//! drains stale results before it starts so late replies from an earlier
//! operation are never mistaken for its own.
//!
//! # Flows
//!
//! ```text
//!  store     encode ──► STORE_FRAGMENT (tasks, node i) ──► ack (results) × N
//!  delegated DELEGATED_STORE (tasks, random node) ──► response (results)
//!  retrieve  READ_REQUEST (broadcast) × N ──► responses (results) ──► decode
//!  repair    probe ──► regenerate missing ──► STORE_FRAGMENT ──► ack
//! ```

pub mod repair;
pub mod retrieve;
pub mod store;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::domain::file::{NewFileRecord, StorageDetails};
use crate::domain::ports::{CodingParams, FileId, FileRepository, FragmentCodec, StorageMode};
use crate::domain::FileRecord;
use crate::ec::build_codec_with_limit;
use crate::error::{Error, Result};
use crate::transport::CoordinatorChannels;

pub use repair::RepairReport;

/// Lead process of the cluster.
#[derive(Debug)]
pub struct Coordinator {
    config: Arc<ClusterConfig>,
    channels: CoordinatorChannels,
}

impl Coordinator {
    /// Bind the configured coordinator addresses.
    pub async fn bind(config: Arc<ClusterConfig>) -> Result<Self> {
        let channels = CoordinatorChannels::bind(&config.coordinator).await?;
        Ok(Self::with_channels(config, channels))
    }

    pub fn with_channels(config: Arc<ClusterConfig>, channels: CoordinatorChannels) -> Self {
        info!(nodes = config.node_count(), "Coordinator started");
        Self { config, channels }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Wait for specific nodes to connect on every channel.
    pub async fn wait_for_nodes(&self, nodes: &[usize]) -> Result<()> {
        self.channels
            .wait_for_nodes(nodes, self.config.timeouts.connect())
            .await
    }

    /// Wait for every registered node.
    pub async fn wait_for_cluster(&self) -> Result<()> {
        self.wait_for_nodes(&self.config.node_indices()).await
    }

    /// Nodes connected on every channel, ascending.
    pub fn connected_nodes(&self) -> Vec<usize> {
        self.channels.connected_nodes()
    }

    /// Codec for this cluster; all parameter checks happen here.
    pub fn codec(&self, params: &CodingParams) -> Result<Box<dyn FragmentCodec>> {
        build_codec_with_limit(
            params,
            self.config.node_count(),
            self.config.max_chunks_per_file,
        )
    }

    /// Discard results left over from earlier operations.
    fn drain_results(&mut self) {
        let mut stale = 0;
        while self.channels.results.try_recv().is_some() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "Discarded stale results");
        }
    }

    // =========================================================================
    // File-level operations
    // =========================================================================

    /// Store a file and record it; the record exists only if the store succeeded.
    pub async fn put_file(
        &mut self,
        repository: &dyn FileRepository,
        file_name: &str,
        content_type: &str,
        data: &[u8],
        params: &CodingParams,
    ) -> Result<FileId> {
        let fragment_ids = self.store(data, params).await?;

        let record = NewFileRecord {
            file_name: file_name.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
            storage_mode: params.mode,
            storage_details: StorageDetails::for_fragments(params, &fragment_ids),
        };
        let id = repository.create_record(record).await?;
        info!(file = %id, name = file_name, mode = %params.mode, "File stored");
        Ok(id)
    }

    /// Look up a file and rebuild its content.
    pub async fn get_file(
        &mut self,
        repository: &dyn FileRepository,
        id: &FileId,
    ) -> Result<(FileRecord, Vec<u8>)> {
        let record = repository
            .get_record(id)
            .await?
            .ok_or_else(|| Error::FileNotFound(id.to_string()))?;

        let size = usize::try_from(record.size)
            .map_err(|_| Error::CorruptShard(format!("file {} is too large", id)))?;
        let data = self
            .retrieve(&record.fragment_ids(), &record.coding_params(), size)
            .await?;
        Ok((record, data))
    }

    /// Repair every file stored with `mode`.
    pub async fn repair_mode(
        &mut self,
        repository: &dyn FileRepository,
        mode: StorageMode,
    ) -> Result<RepairReport> {
        let files = repository.list_by_storage_mode(mode).await?;
        self.repair(&files).await
    }

    /// Repair every recorded file.
    pub async fn repair_all(&mut self, repository: &dyn FileRepository) -> Result<RepairReport> {
        let files = repository.list().await?;
        self.repair(&files).await
    }
}
