//! Typed messages.
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────────┬──────────────────────┬─────────┬─────────┬─────
//! │ frame 0: Header     │ frame 1: Payload     │ data 0  │ data 1  │ …
//! │ (version, type)     │ (bincode, per type)  │ (raw)   │ (raw)   │
//! └─────────────────────┴──────────────────────┴─────────┴─────────┴─────
//! ```
//!
//! Data frames carry fragment chunks in chunk-index order, or the whole file
//! for a delegated store request.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::ports::CodingParams;
use crate::error::{Error, Result};
use crate::fragment::FragmentId;
use crate::transport::codec::MAX_FRAMES;
use crate::transport::Multipart;

/// Wire format version carried in every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Data frames that fit in one message next to the header and payload frames
pub const MAX_DATA_FRAMES: usize = MAX_FRAMES - 2;

// =============================================================================
// Header
// =============================================================================

/// Operation carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestType {
    StoreFragment = 1,
    StoreFragmentAck = 2,
    FragmentReadRequest = 3,
    FragmentReadResponse = 4,
    WorkerDelegatedStoreRequest = 5,
    WorkerDelegatedStoreResponse = 6,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::StoreFragment => "STORE_FRAGMENT",
            RequestType::StoreFragmentAck => "STORE_FRAGMENT_ACK",
            RequestType::FragmentReadRequest => "FRAGMENT_READ_REQUEST",
            RequestType::FragmentReadResponse => "FRAGMENT_READ_RESPONSE",
            RequestType::WorkerDelegatedStoreRequest => "WORKER_DELEGATED_STORE_REQUEST",
            RequestType::WorkerDelegatedStoreResponse => "WORKER_DELEGATED_STORE_RESPONSE",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u16> for RequestType {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Ok(match code {
            1 => RequestType::StoreFragment,
            2 => RequestType::StoreFragmentAck,
            3 => RequestType::FragmentReadRequest,
            4 => RequestType::FragmentReadResponse,
            5 => RequestType::WorkerDelegatedStoreRequest,
            6 => RequestType::WorkerDelegatedStoreResponse,
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

/// Frame 0 of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub request_type: u16,
}

// =============================================================================
// Payloads
// =============================================================================

/// Persist the data frames as the chunks of one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFragment {
    pub fragment_id: FragmentId,
    /// Peer to acknowledge instead of the coordinator
    pub return_address: Option<usize>,
}

/// A fragment was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFragmentAck {
    pub fragment_id: FragmentId,
    pub node: usize,
}

/// Ask every node whether it holds a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentReadRequest {
    pub fragment_id: FragmentId,
}

/// Chunks of a held fragment follow as data frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentReadResponse {
    pub fragment_id: FragmentId,
    pub node: usize,
}

/// Encode the single data frame and place one fragment per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedStoreRequest {
    pub request_id: u64,
    pub params: CodingParams,
}

/// Outcome of a delegated store; `fragments[i]` lives on node `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedStoreResponse {
    pub request_id: u64,
    pub node: usize,
    pub fragments: Vec<FragmentId>,
    pub failure: Option<String>,
}

/// Decoded payload, one variant per request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    StoreFragment(StoreFragment),
    StoreFragmentAck(StoreFragmentAck),
    FragmentReadRequest(FragmentReadRequest),
    FragmentReadResponse(FragmentReadResponse),
    DelegatedStoreRequest(DelegatedStoreRequest),
    DelegatedStoreResponse(DelegatedStoreResponse),
}

impl Payload {
    pub fn request_type(&self) -> RequestType {
        match self {
            Payload::StoreFragment(_) => RequestType::StoreFragment,
            Payload::StoreFragmentAck(_) => RequestType::StoreFragmentAck,
            Payload::FragmentReadRequest(_) => RequestType::FragmentReadRequest,
            Payload::FragmentReadResponse(_) => RequestType::FragmentReadResponse,
            Payload::DelegatedStoreRequest(_) => RequestType::WorkerDelegatedStoreRequest,
            Payload::DelegatedStoreResponse(_) => RequestType::WorkerDelegatedStoreResponse,
        }
    }

    fn to_frame(&self) -> Result<Bytes> {
        let bytes = match self {
            Payload::StoreFragment(p) => bincode::serialize(p)?,
            Payload::StoreFragmentAck(p) => bincode::serialize(p)?,
            Payload::FragmentReadRequest(p) => bincode::serialize(p)?,
            Payload::FragmentReadResponse(p) => bincode::serialize(p)?,
            Payload::DelegatedStoreRequest(p) => bincode::serialize(p)?,
            Payload::DelegatedStoreResponse(p) => bincode::serialize(p)?,
        };
        Ok(Bytes::from(bytes))
    }

    fn from_frame(request_type: RequestType, frame: &[u8]) -> Result<Self> {
        fn parse<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
            Ok(bincode::deserialize(frame)?)
        }

        Ok(match request_type {
            RequestType::StoreFragment => Payload::StoreFragment(parse(frame)?),
            RequestType::StoreFragmentAck => Payload::StoreFragmentAck(parse(frame)?),
            RequestType::FragmentReadRequest => Payload::FragmentReadRequest(parse(frame)?),
            RequestType::FragmentReadResponse => Payload::FragmentReadResponse(parse(frame)?),
            RequestType::WorkerDelegatedStoreRequest => {
                Payload::DelegatedStoreRequest(parse(frame)?)
            }
            RequestType::WorkerDelegatedStoreResponse => {
                Payload::DelegatedStoreResponse(parse(frame)?)
            }
        })
    }
}

// =============================================================================
// Message
// =============================================================================

/// A decoded message: payload plus raw data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Payload,
    pub data: Vec<Bytes>,
}

impl Message {
    pub fn new(payload: Payload, data: Vec<Bytes>) -> Self {
        Self { payload, data }
    }

    pub fn store_fragment(
        fragment_id: FragmentId,
        return_address: Option<usize>,
        chunks: Vec<Bytes>,
    ) -> Self {
        Self::new(
            Payload::StoreFragment(StoreFragment {
                fragment_id,
                return_address,
            }),
            chunks,
        )
    }

    pub fn store_ack(fragment_id: FragmentId, node: usize) -> Self {
        Self::new(
            Payload::StoreFragmentAck(StoreFragmentAck { fragment_id, node }),
            Vec::new(),
        )
    }

    pub fn read_request(fragment_id: FragmentId) -> Self {
        Self::new(
            Payload::FragmentReadRequest(FragmentReadRequest { fragment_id }),
            Vec::new(),
        )
    }

    pub fn read_response(fragment_id: FragmentId, node: usize, chunks: Vec<Bytes>) -> Self {
        Self::new(
            Payload::FragmentReadResponse(FragmentReadResponse { fragment_id, node }),
            chunks,
        )
    }

    pub fn delegated_request(request_id: u64, params: CodingParams, file: Bytes) -> Self {
        Self::new(
            Payload::DelegatedStoreRequest(DelegatedStoreRequest { request_id, params }),
            vec![file],
        )
    }

    pub fn delegated_response(
        request_id: u64,
        node: usize,
        outcome: std::result::Result<Vec<FragmentId>, String>,
    ) -> Self {
        let (fragments, failure) = match outcome {
            Ok(fragments) => (fragments, None),
            Err(reason) => (Vec::new(), Some(reason)),
        };
        Self::new(
            Payload::DelegatedStoreResponse(DelegatedStoreResponse {
                request_id,
                node,
                fragments,
                failure,
            }),
            Vec::new(),
        )
    }

    pub fn request_type(&self) -> RequestType {
        self.payload.request_type()
    }

    /// Serialize into frames.
    pub fn encode(&self) -> Result<Multipart> {
        if self.data.len() > MAX_DATA_FRAMES {
            return Err(Error::InvalidParameter(format!(
                "{} message carries {} data frames, at most {} fit",
                self.request_type(),
                self.data.len(),
                MAX_DATA_FRAMES
            )));
        }
        let header = Header {
            version: PROTOCOL_VERSION,
            request_type: self.request_type() as u16,
        };
        let mut parts = Vec::with_capacity(2 + self.data.len());
        parts.push(Bytes::from(bincode::serialize(&header)?));
        parts.push(self.payload.to_frame()?);
        parts.extend(self.data.iter().cloned());
        Ok(parts)
    }

    /// Parse frames; unknown request types fail with `UnknownMessageType`.
    pub fn decode(mut parts: Multipart) -> Result<Self> {
        if parts.len() < 2 {
            return Err(Error::Protocol(format!(
                "message needs a header and a payload frame, got {} frames",
                parts.len()
            )));
        }
        let data = parts.split_off(2);
        let header: Header = bincode::deserialize(&parts[0])?;
        if header.version != PROTOCOL_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {} (expected {})",
                header.version, PROTOCOL_VERSION
            )));
        }
        let request_type = RequestType::try_from(header.request_type)?;
        let payload = Payload::from_frame(request_type, &parts[1])?;
        Ok(Self { payload, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn id(s: &str) -> FragmentId {
        FragmentId::parse(s).unwrap()
    }

    #[test]
    fn test_too_many_data_frames_rejected() {
        let chunks = vec![Bytes::from_static(b"x"); MAX_DATA_FRAMES + 1];
        assert_matches!(
            Message::store_fragment(id("wide"), None, chunks).encode(),
            Err(Error::InvalidParameter(_))
        );

        let chunks = vec![Bytes::from_static(b"x"); MAX_DATA_FRAMES];
        let parts = Message::store_fragment(id("wide"), None, chunks).encode().unwrap();
        assert_eq!(parts.len(), MAX_FRAMES);
    }

    #[test]
    fn test_store_fragment_frames() {
        let chunks = vec![Bytes::from_static(b"c0"), Bytes::from_static(b"c1")];
        let msg = Message::store_fragment(id("abc"), Some(2), chunks.clone());

        let parts = msg.encode().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(&parts[2..], chunks.as_slice());

        let decoded = Message::decode(parts).unwrap();
        assert_eq!(decoded.request_type(), RequestType::StoreFragment);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_request_type() {
        let header = Header {
            version: PROTOCOL_VERSION,
            request_type: 42,
        };
        let parts = vec![
            Bytes::from(bincode::serialize(&header).unwrap()),
            Bytes::new(),
        ];
        assert_matches!(Message::decode(parts), Err(Error::UnknownMessageType(42)));
    }

    #[test]
    fn test_rejects_short_and_foreign_messages() {
        assert_matches!(
            Message::decode(vec![Bytes::new()]),
            Err(Error::Protocol(_))
        );

        let mut parts = Message::read_request(id("x")).encode().unwrap();
        parts[0] = Bytes::from(
            bincode::serialize(&Header {
                version: 9,
                request_type: RequestType::FragmentReadRequest as u16,
            })
            .unwrap(),
        );
        assert_matches!(Message::decode(parts), Err(Error::Protocol(_)));
    }

    #[test]
    fn test_payload_must_match_header() {
        let mut parts = Message::store_ack(id("ack"), 1).encode().unwrap();
        parts[1] = Bytes::from_static(&[0xff]);
        assert!(Message::decode(parts).is_err());
    }

    #[test]
    fn test_delegated_response_failure() {
        let msg = Message::delegated_response(7, 3, Err("peer 1 silent".to_string()));
        let decoded = Message::decode(msg.encode().unwrap()).unwrap();

        assert_matches!(
            decoded.payload,
            Payload::DelegatedStoreResponse(DelegatedStoreResponse {
                request_id: 7,
                node: 3,
                ref fragments,
                failure: Some(_),
            }) if fragments.is_empty()
        );
    }

    #[test]
    fn test_request_type_codes() {
        for code in 1u16..=6 {
            let ty = RequestType::try_from(code).unwrap();
            assert_eq!(ty as u16, code);
        }
        assert_eq!(
            RequestType::WorkerDelegatedStoreRequest.to_string(),
            "WORKER_DELEGATED_STORE_REQUEST"
        );
    }
}
