//! WebSocket front for a [`MemoryBackend`].
//!
//! ```text
//! Client A ──┐                      ┌── forward task (request 1) ◄── listener
//!            ├── connection loop ───┤
//! Client B ──┘   │ Write → apply    └── forward task (request 2) ◄── listener
//!                │ Ping  → Pong              │
//!                ▼                           ▼
//!           MemoryBackend ──broadcast──► snapshots → outgoing channel → socket
//! ```
//!
//! Each subscription on a connection gets its own forwarding task keyed by
//! request id. Unsubscribe or disconnect aborts the task, which drops the
//! listener and releases the backend receiver.

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::backend::{BackendEvent, CollectionBackend};
use crate::error::{BackendError, ErrorCode};
use crate::memory::MemoryBackend;
use crate::protocol::{CollectionMessage, MessageType};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Open subscriptions allowed per connection
    pub max_subscriptions_per_connection: usize,
    /// Outgoing snapshots buffered per connection
    pub outgoing_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_subscriptions_per_connection: 32,
            outgoing_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub total_subscriptions: u64,
    pub writes_applied: u64,
    pub writes_rejected: u64,
}

pub struct CollectionServer {
    config: ServerConfig,
    backend: Arc<MemoryBackend>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollectionServer {
    pub fn new(config: ServerConfig, backend: Arc<MemoryBackend>) -> Self {
        Self {
            config,
            backend,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Default configuration on `bind_addr`.
    pub fn with_backend(bind_addr: impl Into<String>, backend: Arc<MemoryBackend>) -> Self {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            ..ServerConfig::default()
        };
        Self::new(config, backend)
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Bind and serve until the accept loop fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collection server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let backend = self.backend.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, backend, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        backend: Arc<MemoryBackend>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<CollectionMessage>(config.outgoing_capacity.max(1));
        let mut subscriptions: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let bytes: Vec<u8> = match msg {
                            Some(Ok(Message::Binary(data))) => data.into(),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                log::debug!("Read error from {addr}: {e}");
                                break;
                            }
                        };

                        let request = match CollectionMessage::decode(&bytes) {
                            Ok(request) => request,
                            Err(e) => {
                                log::warn!("Dropping malformed message from {addr}: {e}");
                                continue;
                            }
                        };
                        {
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += bytes.len() as u64;
                        }

                        match request.msg_type {
                            MessageType::Subscribe => {
                                subscriptions.retain(|_, task| !task.is_finished());
                                let response = if subscriptions.len() >= config.max_subscriptions_per_connection {
                                    Some(BackendError::new(
                                        ErrorCode::ResourceExhausted,
                                        "too many subscriptions on this connection",
                                    ))
                                } else {
                                    match Self::open_subscription(&backend, &request, out_tx.clone()) {
                                        Ok(task) => {
                                            if let Some(previous) = subscriptions.insert(request.request_id, task) {
                                                previous.abort();
                                            }
                                            stats.write().await.total_subscriptions += 1;
                                            None
                                        }
                                        Err(error) => Some(error),
                                    }
                                };
                                if let Some(error) = response {
                                    log::debug!("Subscription {} from {addr} rejected: {error}", request.request_id);
                                    send_message(&mut ws_sender, &CollectionMessage::error(request.request_id, &error)?).await?;
                                }
                            }

                            MessageType::Unsubscribe => {
                                if let Some(task) = subscriptions.remove(&request.request_id) {
                                    task.abort();
                                    log::debug!("Subscription {} from {addr} closed", request.request_id);
                                }
                            }

                            MessageType::Write => {
                                let outcome = request
                                    .write_op()
                                    .map_err(|e| BackendError::invalid_argument(e.to_string()))
                                    .and_then(|op| backend.apply(op));
                                let reply = match outcome {
                                    Ok(id) => {
                                        stats.write().await.writes_applied += 1;
                                        CollectionMessage::ack(request.request_id, id)
                                    }
                                    Err(error) => {
                                        stats.write().await.writes_rejected += 1;
                                        log::warn!("Write from {addr} rejected: {error}");
                                        CollectionMessage::error(request.request_id, &error)
                                    }
                                };
                                send_message(&mut ws_sender, &reply?).await?;
                            }

                            MessageType::Ping => {
                                send_message(&mut ws_sender, &CollectionMessage::pong()).await?;
                            }

                            other => {
                                log::warn!("Unexpected {other:?} from {addr}");
                            }
                        }
                    }

                    Some(outgoing) = out_rx.recv() => {
                        send_message(&mut ws_sender, &outgoing).await?;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        for (_, task) in subscriptions.drain() {
            task.abort();
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection from {addr} closed");
        result
    }

    /// Open a listener and spawn the task forwarding its events.
    fn open_subscription(
        backend: &MemoryBackend,
        request: &CollectionMessage,
        out_tx: mpsc::Sender<CollectionMessage>,
    ) -> Result<JoinHandle<()>, BackendError> {
        let subscribe = request
            .subscribe_request()
            .map_err(|e| BackendError::invalid_argument(e.to_string()))?;
        let mut listener = backend.subscribe(&subscribe.collection, subscribe.query.as_ref())?;
        let request_id = request.request_id;

        log::debug!("Subscription {request_id} on '{}'", subscribe.collection);
        Ok(tokio::spawn(async move {
            while let Some(event) = listener.next().await {
                let (msg, last) = match &event {
                    BackendEvent::Snapshot(records) => (CollectionMessage::snapshot(request_id, records), false),
                    BackendEvent::Error(error) => (CollectionMessage::error(request_id, error), true),
                };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::error!("Closing subscription {request_id}: {e}");
                        break;
                    }
                };
                if out_tx.send(msg).await.is_err() || last {
                    break;
                }
            }
        }))
    }
}

async fn send_message<S>(sink: &mut S, msg: &CollectionMessage) -> Result<(), BoxError>
where
    S: Sink<Message> + Unpin,
    S::Error: Error + Send + Sync + 'static,
{
    let encoded = msg.encode()?;
    sink.send(Message::Binary(encoded.into())).await?;
    Ok(())
}
