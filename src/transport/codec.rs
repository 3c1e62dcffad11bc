//! Multipart framing over a byte stream.
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────┬──────────────┬───────────┬─────
//! │ frames (u32) │ len_0 (u32)  │ frame_0   │ len_1 (u32)  │ frame_1   │ …
//! └──────────────┴──────────────┴───────────┴──────────────┴───────────┴─────
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// One logical message: an ordered list of frames.
pub type Multipart = Vec<Bytes>;

/// Most frames accepted in one message
pub const MAX_FRAMES: usize = 64;

/// Largest single frame accepted
pub const MAX_FRAME_LEN: usize = 1 << 30;

const LEN_SIZE: usize = 4;

fn peek_u32(src: &[u8], at: usize) -> usize {
    u32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]) as usize
}

/// `tokio-util` codec for [`Multipart`] messages.
#[derive(Debug, Clone)]
pub struct MultipartCodec {
    max_frames: usize,
    max_frame_len: usize,
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl MultipartCodec {
    pub fn new(max_frames: usize, max_frame_len: usize) -> Self {
        Self {
            max_frames,
            max_frame_len,
        }
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.max_frames {
            return Err(Error::Protocol(format!(
                "message has {} frames, expected 1..={}",
                count, self.max_frames
            )));
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_frame_len {
            return Err(Error::Protocol(format!(
                "frame of {} bytes exceeds the limit of {}",
                len, self.max_frame_len
            )));
        }
        Ok(())
    }
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Multipart>> {
        if src.len() < LEN_SIZE {
            return Ok(None);
        }
        let count = peek_u32(src, 0);
        self.check_count(count)?;

        // walk the length prefixes without consuming until the whole message is here
        let mut offset = LEN_SIZE;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            if src.len() < offset + LEN_SIZE {
                src.reserve(offset + LEN_SIZE - src.len());
                return Ok(None);
            }
            let len = peek_u32(src, offset);
            self.check_len(len)?;
            offset += LEN_SIZE;

            if src.len() < offset + len {
                src.reserve(offset + len - src.len());
                return Ok(None);
            }
            offset += len;
            lengths.push(len);
        }

        src.advance(LEN_SIZE);
        let parts = lengths
            .into_iter()
            .map(|len| {
                src.advance(LEN_SIZE);
                src.split_to(len).freeze()
            })
            .collect();
        Ok(Some(parts))
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = Error;

    fn encode(&mut self, item: Multipart, dst: &mut BytesMut) -> Result<()> {
        self.check_count(item.len())?;
        for frame in &item {
            self.check_len(frame.len())?;
        }

        let total: usize = LEN_SIZE + item.iter().map(|f| LEN_SIZE + f.len()).sum::<usize>();
        dst.reserve(total);
        dst.put_u32(item.len() as u32);
        for frame in item {
            dst.put_u32(frame.len() as u32);
            dst.extend_from_slice(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(parts: Multipart) -> BytesMut {
        let mut buf = BytesMut::new();
        MultipartCodec::default().encode(parts, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_layout() {
        let buf = encode(vec![Bytes::from_static(b"ab"), Bytes::new()]);
        assert_eq!(
            buf.as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_decode_waits_for_whole_message() {
        let parts = vec![Bytes::from_static(b"header"), Bytes::from_static(b"payload")];
        let full = encode(parts.clone());
        let mut codec = MultipartCodec::default();

        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut partial).unwrap().is_none(), "cut at {}", cut);
        }

        let mut buf = full.clone();
        buf.extend_from_slice(&full);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(parts.clone()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(parts));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_limits() {
        let mut codec = MultipartCodec::new(2, 4);
        let mut buf = BytesMut::new();

        assert!(codec.encode(vec![], &mut buf).is_err());
        assert!(codec
            .encode(vec![Bytes::from_static(b"12345")], &mut buf)
            .is_err());
        assert!(codec.encode(vec![Bytes::new(); 3], &mut buf).is_err());

        let mut oversized = BytesMut::from(&[0u8, 0, 0, 9][..]);
        assert!(matches!(
            codec.decode(&mut oversized),
            Err(Error::Protocol(_))
        ));
    }
}
