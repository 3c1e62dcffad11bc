//! Persistent node identity.

use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::fragment::random_name;

/// File holding the identity inside the node directory
pub const IDENTITY_FILE: &str = ".id";

const IDENTITY_LEN: usize = 8;

/// Random name created on first start and reused afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Read `<dir>/.id`, creating it if this is the first start.
    pub async fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(IDENTITY_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                let id = existing.trim();
                if id.is_empty() {
                    return Err(Error::Config(format!("{} is empty", path.display())));
                }
                Ok(Self(id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = random_name(IDENTITY_LEN);
                tokio::fs::write(&path, &id).await?;
                info!(identity = %id, path = %path.display(), "Created node identity");
                Ok(Self(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
