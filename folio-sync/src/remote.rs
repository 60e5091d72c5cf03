//! [`CollectionBackend`] over a WebSocket connection to a
//! [`CollectionServer`](crate::server::CollectionServer).
//!
//! Every listener owns its own connection, opened lazily on first poll, so
//! `subscribe` never blocks and dropping the listener closes the socket.
//! Transport failures surface as transient [`ErrorCode::Unavailable`] or
//! [`ErrorCode::DeadlineExceeded`] events; the caller decides whether to
//! resubscribe.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::backend::{check_collection_name, BackendEvent, CollectionBackend, Listener};
use crate::error::{BackendError, ErrorCode};
use crate::memory::WriteOp;
use crate::protocol::{CollectionMessage, MessageType, SubscribeRequest};
use crate::query::Query;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RemoteBackend {
    url: String,
    connect_timeout: Duration,
}

enum ListenerState {
    Pending(SubscribeRequest),
    Open { ws: WsStream, request_id: Uuid },
    Closed,
}

impl RemoteBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<WsStream, BackendError> {
        match tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(&self.url)).await {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(BackendError::unavailable(format!(
                "cannot reach {}: {e}",
                self.url
            ))),
            Err(_) => Err(BackendError::new(
                ErrorCode::DeadlineExceeded,
                format!("connecting to {} timed out", self.url),
            )),
        }
    }

    /// Apply an admin edit on the server. Returns the affected document id.
    pub async fn write(&self, op: WriteOp) -> Result<String, BackendError> {
        let mut ws = self.connect().await?;
        let request_id = Uuid::new_v4();
        send(&mut ws, &CollectionMessage::write(request_id, &op).map_err(malformed)?).await?;

        let result = loop {
            match next_message(&mut ws).await {
                Ok(msg) if msg.request_id != request_id => continue,
                Ok(msg) => match msg.msg_type {
                    MessageType::Ack => break msg.ack_id().map_err(malformed),
                    MessageType::Error => break Err(msg.backend_error().map_err(malformed)?),
                    _ => continue,
                },
                Err(e) => break Err(e),
            }
        };
        let _ = ws.close(None).await;
        result
    }

    async fn open(&self, request: SubscribeRequest) -> Result<(WsStream, Uuid), BackendError> {
        let mut ws = self.connect().await?;
        let request_id = Uuid::new_v4();
        send(&mut ws, &CollectionMessage::subscribe(request_id, &request).map_err(malformed)?).await?;
        log::debug!("Subscribed to '{}' on {} ({request_id})", request.collection, self.url);
        Ok((ws, request_id))
    }
}

async fn send(ws: &mut WsStream, msg: &CollectionMessage) -> Result<(), BackendError> {
    let encoded = msg.encode().map_err(malformed)?;
    ws.send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| BackendError::unavailable(format!("send failed: {e}")))
}

/// Next protocol message. A closed or broken socket is an `Unavailable`
/// error.
async fn next_message(ws: &mut WsStream) -> Result<CollectionMessage, BackendError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => {
                let bytes: Vec<u8> = data.into();
                return CollectionMessage::decode(&bytes).map_err(malformed);
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(BackendError::unavailable("connection closed by server"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(BackendError::unavailable(format!("connection lost: {e}"))),
        }
    }
}

fn malformed(e: impl std::fmt::Display) -> BackendError {
    BackendError::new(ErrorCode::Internal, format!("malformed message: {e}"))
}

/// Read until the next event for `request_id`.
async fn next_event(mut ws: WsStream, request_id: Uuid) -> (BackendEvent, ListenerState) {
    loop {
        let msg = match next_message(&mut ws).await {
            Ok(msg) => msg,
            Err(e) => return (BackendEvent::Error(e), ListenerState::Closed),
        };
        if msg.request_id != request_id {
            continue;
        }
        match msg.msg_type {
            MessageType::Snapshot => {
                return match msg.snapshot_records() {
                    Ok(records) => (BackendEvent::Snapshot(records), ListenerState::Open { ws, request_id }),
                    Err(e) => (BackendEvent::Error(malformed(e)), ListenerState::Closed),
                };
            }
            MessageType::Error => {
                let error = msg.backend_error().unwrap_or_else(malformed);
                return (BackendEvent::Error(error), ListenerState::Closed);
            }
            other => log::debug!("Ignoring {other:?} on listener {request_id}"),
        }
    }
}

impl CollectionBackend for RemoteBackend {
    fn subscribe(&self, collection: &str, query: Option<&Query>) -> Result<Listener, BackendError> {
        check_collection_name(collection)?;
        if let Some(query) = query {
            query
                .validate()
                .map_err(|e| BackendError::invalid_argument(e.to_string()))?;
        }

        let backend = self.clone();
        let request = SubscribeRequest {
            collection: collection.to_string(),
            query: query.cloned(),
        };

        let events = stream::unfold(ListenerState::Pending(request), move |state| {
            let backend = backend.clone();
            async move {
                match state {
                    ListenerState::Pending(request) => match backend.open(request).await {
                        Ok((ws, request_id)) => Some(next_event(ws, request_id).await),
                        Err(e) => Some((BackendEvent::Error(e), ListenerState::Closed)),
                    },
                    ListenerState::Open { ws, request_id } => Some(next_event(ws, request_id).await),
                    ListenerState::Closed => None,
                }
            }
        });
        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_subscribe_rejects_bad_requests_up_front() {
        let backend = RemoteBackend::new("ws://127.0.0.1:1");
        let err = backend.subscribe("", None).err().unwrap();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let err = backend.subscribe("projects", Some(&Query::new().limit(0))).err().unwrap();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let port = closed_port().await;
        let backend = RemoteBackend::new(format!("ws://127.0.0.1:{port}"));

        let mut listener = backend.subscribe("projects", None).unwrap();
        match listener.next().await {
            Some(BackendEvent::Error(e)) => assert!(e.is_transient(), "{e}"),
            other => panic!("Expected error, got {other:?}"),
        }
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn test_write_to_unreachable_server() {
        let port = closed_port().await;
        let backend = RemoteBackend::new(format!("ws://127.0.0.1:{port}"));
        let op = WriteOp::Delete {
            collection: "projects".into(),
            id: "p1".into(),
        };
        let err = backend.write(op).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
    }
}
