//! Wire protocol between the coordinator and storage nodes.
//!
//! | Request type                      | Channel            | Direction            |
//! |-----------------------------------|--------------------|----------------------|
//! | `STORE_FRAGMENT`                  | tasks, peer        | coordinator/worker → node |
//! | `STORE_FRAGMENT_ACK`              | results, peer      | node → coordinator/worker |
//! | `FRAGMENT_READ_REQUEST`           | broadcast          | coordinator → all nodes   |
//! | `FRAGMENT_READ_RESPONSE`          | results            | holder → coordinator      |
//! | `WORKER_DELEGATED_STORE_REQUEST`  | tasks              | coordinator → worker      |
//! | `WORKER_DELEGATED_STORE_RESPONSE` | results            | worker → coordinator      |

pub mod message;

pub use message::{
    DelegatedStoreRequest, DelegatedStoreResponse, FragmentReadRequest, FragmentReadResponse,
    Header, Message, Payload, RequestType, StoreFragment, StoreFragmentAck, MAX_DATA_FRAMES,
    PROTOCOL_VERSION,
};
