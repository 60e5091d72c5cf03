//! Wire protocol between [`CollectionServer`](crate::server::CollectionServer)
//! and [`RemoteBackend`](crate::remote::RemoteBackend).
//!
//! Every WebSocket binary frame is one bincode-encoded envelope:
//! ```text
//! ┌──────────┬────────────┬──────────────┐
//! │ msg_type │ request_id │ payload      │
//! │ 1 byte   │ 16 bytes   │ JSON, varint │
//! └──────────┴────────────┴──────────────┘
//! ```
//!
//! Payloads are JSON because documents are schemaless `serde_json` values,
//! which bincode cannot describe. `request_id` ties snapshots and errors to
//! the subscription that asked for them, and acks to their write.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::RawRecord;

use crate::error::BackendError;
use crate::memory::WriteOp;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client opens a listener
    Subscribe = 1,
    /// Client closes a listener
    Unsubscribe = 2,
    /// Full collection snapshot for one listener
    Snapshot = 3,
    /// Listener or write failure; ends the listener
    Error = 4,
    /// Admin edit
    Write = 5,
    /// Write applied
    Ack = 6,
    Ping = 7,
    Pong = 8,
}

/// Payload of a [`MessageType::Subscribe`] message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AckPayload {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMessage {
    pub msg_type: MessageType,
    pub request_id: Uuid,
    pub payload: Vec<u8>,
}

impl CollectionMessage {
    fn with_json<P: Serialize>(
        msg_type: MessageType,
        request_id: Uuid,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(payload)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type,
            request_id,
            payload,
        })
    }

    fn empty(msg_type: MessageType, request_id: Uuid) -> Self {
        Self {
            msg_type,
            request_id,
            payload: Vec::new(),
        }
    }

    pub fn subscribe(request_id: Uuid, request: &SubscribeRequest) -> Result<Self, ProtocolError> {
        Self::with_json(MessageType::Subscribe, request_id, request)
    }

    pub fn unsubscribe(request_id: Uuid) -> Self {
        Self::empty(MessageType::Unsubscribe, request_id)
    }

    pub fn snapshot(request_id: Uuid, records: &[RawRecord]) -> Result<Self, ProtocolError> {
        Self::with_json(MessageType::Snapshot, request_id, &records)
    }

    pub fn error(request_id: Uuid, error: &BackendError) -> Result<Self, ProtocolError> {
        Self::with_json(MessageType::Error, request_id, error)
    }

    pub fn write(request_id: Uuid, op: &WriteOp) -> Result<Self, ProtocolError> {
        Self::with_json(MessageType::Write, request_id, op)
    }

    pub fn ack(request_id: Uuid, id: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::with_json(MessageType::Ack, request_id, &AckPayload { id: id.into() })
    }

    pub fn ping() -> Self {
        Self::empty(MessageType::Ping, Uuid::nil())
    }

    pub fn pong() -> Self {
        Self::empty(MessageType::Pong, Uuid::nil())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    fn parse<P: DeserializeOwned>(&self, expected: MessageType) -> Result<P, ProtocolError> {
        if self.msg_type != expected {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn subscribe_request(&self) -> Result<SubscribeRequest, ProtocolError> {
        self.parse(MessageType::Subscribe)
    }

    pub fn snapshot_records(&self) -> Result<Vec<RawRecord>, ProtocolError> {
        self.parse(MessageType::Snapshot)
    }

    pub fn backend_error(&self) -> Result<BackendError, ProtocolError> {
        self.parse(MessageType::Error)
    }

    pub fn write_op(&self) -> Result<WriteOp, ProtocolError> {
        self.parse(MessageType::Write)
    }

    /// Id of the document an acknowledged write touched.
    pub fn ack_id(&self) -> Result<String, ProtocolError> {
        self.parse::<AckPayload>(MessageType::Ack).map(|ack| ack.id)
    }
}

#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType(MessageType),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType(t) => write!(f, "Unexpected message type {t:?}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
