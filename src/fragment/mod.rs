//! Fragment naming and on-disk layout.
//!
//! ```text
//! <data_dir>/
//! ├── 0/
//! │   ├── .id            node identity, written on first boot
//! │   ├── Xk3pQ9aB.0     fragment Xk3pQ9aB, chunk 0
//! │   └── Xk3pQ9aB.1     fragment Xk3pQ9aB, chunk 1
//! ├── 1/
//! └── …
//! ```

pub mod chunk_store;
pub mod naming;

use bytes::Bytes;

use crate::error::{Error, Result};

pub use chunk_store::ChunkStore;
pub use naming::{random_name, FragmentId};

/// Default upper bound on chunks per fragment
pub const MAX_CHUNKS_PER_FILE: usize = 10;

/// Split a fragment into `count` equal chunks.
pub fn split_chunks(fragment: &[u8], count: usize) -> Result<Vec<Bytes>> {
    if count == 0 || fragment.len() % count != 0 {
        return Err(Error::InvalidParameter(format!(
            "cannot split {} bytes into {} equal chunks",
            fragment.len(),
            count
        )));
    }
    let size = fragment.len() / count;
    let whole = Bytes::copy_from_slice(fragment);
    Ok((0..count)
        .map(|i| whole.slice(i * size..(i + 1) * size))
        .collect())
}

/// Concatenate chunks back into a fragment, in chunk-index order.
pub fn join_chunks(chunks: &[Bytes]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        let fragment: Vec<u8> = (0u8..12).collect();
        let chunks = split_chunks(&fragment, 3).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].as_ref(), &[4, 5, 6, 7]);
        assert_eq!(join_chunks(&chunks), fragment);
    }

    #[test]
    fn test_split_rejects_uneven() {
        assert!(split_chunks(&[1, 2, 3], 2).is_err());
        assert!(split_chunks(&[1, 2, 3], 0).is_err());
    }
}
