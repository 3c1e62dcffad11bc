//! Node-local chunk files.
//!
//! Each storage node owns one directory. A fragment of `c` chunks occupies
//! `<id>.0 … <id>.(c-1)`; chunks are write-once.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::fragment::FragmentId;

/// Chunk files under one node directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
    max_chunks: usize,
}

impl ChunkStore {
    /// Open (creating if needed) the directory at `root`.
    pub async fn open(root: impl Into<PathBuf>, max_chunks: usize) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root, max_chunks })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one chunk file.
    pub fn chunk_path(&self, id: &FragmentId, chunk_index: usize) -> PathBuf {
        self.root.join(id.chunk_file_name(chunk_index))
    }

    /// Persist all chunks of a fragment.
    ///
    /// Rewriting a chunk with identical bytes is a no-op, so a retried store
    /// succeeds; different bytes under an existing name are refused.
    #[instrument(skip(self, chunks), fields(fragment = %id, chunks = chunks.len()))]
    pub async fn write_fragment(&self, id: &FragmentId, chunks: &[Bytes]) -> Result<u64> {
        if chunks.is_empty() || chunks.len() > self.max_chunks {
            return Err(Error::InvalidParameter(format!(
                "fragment {} has {} chunks, expected 1..={}",
                id,
                chunks.len(),
                self.max_chunks
            )));
        }

        let mut written = 0u64;
        for (index, chunk) in chunks.iter().enumerate() {
            let path = self.chunk_path(id, index);

            match tokio::fs::read(&path).await {
                Ok(existing) if existing == chunk.as_ref() => {
                    debug!(chunk = index, "Chunk already present with identical content");
                    continue;
                }
                Ok(_) => {
                    return Err(Error::FragmentConflict {
                        fragment: id.to_string(),
                        chunk: index,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            // write aside, then move into place so readers never see a torn chunk
            let partial = self
                .root
                .join(format!(".{}.partial", id.chunk_file_name(index)));
            let mut file = tokio::fs::File::create(&partial).await?;
            file.write_all(chunk).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, &path).await?;

            written += chunk.len() as u64;
        }

        debug!(bytes = written, "Fragment persisted");
        Ok(written)
    }

    /// Read chunks `0, 1, …` until the first missing index.
    ///
    /// An empty result means this node does not hold the fragment.
    pub async fn read_fragment(&self, id: &FragmentId) -> Result<Vec<Bytes>> {
        let mut chunks = Vec::new();
        for index in 0..self.max_chunks {
            match tokio::fs::read(self.chunk_path(id, index)).await {
                Ok(data) => chunks.push(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(chunks)
    }

    /// Delete every chunk of a fragment, returning how many were removed.
    pub async fn remove_fragment(&self, id: &FragmentId) -> Result<usize> {
        let mut removed = 0;
        for index in 0..self.max_chunks {
            match tokio::fs::remove_file(self.chunk_path(id, index)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
