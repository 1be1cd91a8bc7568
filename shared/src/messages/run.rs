//! Run orders published by the controller and consumed by every participant

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SharedError, SharedResult};
use crate::types::QosLevel;

/// Begin-run order, published as JSON on the begin-run topic.
///
/// Field names are fixed by the participants' parser and must not change.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BeginRun {
    /// Identifier shared by every repetition of one configuration
    pub uuid: Uuid,
    /// Zero-based repetition being attempted
    pub repetition: u32,
    pub client_amount: u32,
    pub msg_qos: QosLevel,
    pub msg_amount: u64,
    pub msg_size: u64,
    pub msg_freq: f64,
}

impl BeginRun {
    pub fn to_payload(&self) -> SharedResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SharedError::SerializationError { message: e.to_string() })
    }
}

/// Void notice: the payload is the bare identifier of whoever reconnected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoidNotice {
    pub origin: String,
}

impl VoidNotice {
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            origin: String::from_utf8_lossy(payload).trim().to_string(),
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.origin.as_bytes().to_vec()
    }
}
