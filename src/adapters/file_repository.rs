//! File Repository Adapters
//!
//! Implements the `FileRepository` port with an in-memory map (tests and
//! short-lived runs) and a single JSON document on disk (the CLI).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::file::{FileRecord, NewFileRecord};
use crate::domain::ports::{FileId, FileRepository};
use crate::error::Result;

fn sorted_by_creation(mut records: Vec<FileRecord>) -> Vec<FileRecord> {
    records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    records
}

// =============================================================================
// In-Memory Repository
// =============================================================================

/// Records kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileRepository {
    records: Arc<RwLock<BTreeMap<FileId, FileRecord>>>,
}

impl InMemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl FileRepository for InMemoryFileRepository {
    async fn create_record(&self, record: NewFileRecord) -> Result<FileId> {
        let id = FileId::generate();
        self.records
            .write()
            .insert(id.clone(), record.into_record(id.clone()));
        Ok(id)
    }

    async fn get_record(&self, id: &FileId) -> Result<Option<FileRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        Ok(sorted_by_creation(
            self.records.read().values().cloned().collect(),
        ))
    }
}

// =============================================================================
// JSON File Repository
// =============================================================================

/// Records kept as one JSON array, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self) -> Result<Vec<FileRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[FileRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let partial = self.path.with_extension("partial");
        tokio::fs::write(&partial, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepository for JsonFileRepository {
    async fn create_record(&self, record: NewFileRecord) -> Result<FileId> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await?;
        let id = FileId::generate();
        records.push(record.into_record(id.clone()));
        self.save(&records).await?;

        debug!(file_id = %id, path = %self.path.display(), "File record saved");
        Ok(id)
    }

    async fn get_record(&self, id: &FileId) -> Result<Option<FileRecord>> {
        Ok(self.load().await?.into_iter().find(|r| &r.id == id))
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        Ok(sorted_by_creation(self.load().await?))
    }
}
