//! Fragment names and chunk file names.
//!
//! A fragment is stored as `<fragment-id>.<chunk-index>` inside the owning
//! node's directory. Ids arrive over the network, so they are restricted to a
//! character set that can never escape that directory.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of generated fragment ids
pub const FRAGMENT_ID_LEN: usize = 8;

/// Longest id accepted from the wire
pub const MAX_FRAGMENT_ID_LEN: usize = 128;

/// Random alphanumeric string of the given length.
pub fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Name of a fragment, unique across the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FragmentId(String);

impl FragmentId {
    /// Fresh random id.
    pub fn random() -> Self {
        Self(random_name(FRAGMENT_ID_LEN))
    }

    /// Validate an id received from outside.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_FRAGMENT_ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(Error::InvalidParameter(format!(
                "invalid fragment id: {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of one chunk of this fragment.
    pub fn chunk_file_name(&self, chunk_index: usize) -> String {
        format!("{}.{}", self.0, chunk_index)
    }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FragmentId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FragmentId> for String {
    fn from(id: FragmentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids() {
        let id = FragmentId::random();
        assert_eq!(id.as_str().len(), FRAGMENT_ID_LEN);
        assert!(FragmentId::parse(id.as_str()).is_ok());
        assert_ne!(FragmentId::random(), FragmentId::random());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        for bad in ["", "../etc", "a/b", "a.0", "x y", ".id"] {
            assert!(FragmentId::parse(bad).is_err(), "{:?} accepted", bad);
        }
        assert!(FragmentId::parse(&"a".repeat(MAX_FRAGMENT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_chunk_file_name() {
        let id = FragmentId::parse("Ab3_x-9").unwrap();
        assert_eq!(id.chunk_file_name(0), "Ab3_x-9.0");
        assert_eq!(id.chunk_file_name(9), "Ab3_x-9.9");
    }

    #[test]
    fn test_serde_validates() {
        let id: FragmentId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_str::<FragmentId>("\"../abc\"").is_err());
    }
}
