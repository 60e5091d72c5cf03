//! # folio-sync — Live collection sync with graceful degradation
//!
//! Keeps a typed view of a backend collection up to date and falls back to
//! bundled data when the backend is disabled, unreachable, or refuses.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   Listener    ┌───────────────────────┐
//! │ ResilientCollectionSync  │ ◄──────────── │ dyn CollectionBackend │
//! │  SyncMachine (retries)   │   snapshots   ├───────────┬───────────┤
//! │  watch<SyncView<T>>      │               │ Memory    │ Remote    │
//! └────────────┬─────────────┘               └─────┬─────┴─────┬─────┘
//!              │ fallback                          │           │ WebSocket
//!              ▼                                   │           ▼
//!        FallbackDataset                           │  ┌──────────────────┐
//!                                                  └─►│ CollectionServer │
//!                                                     └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`sync`] — the resilient subscription component
//! - [`state`] — connection state machine and retry decisions
//! - [`backend`] — the listener seam every backend implements
//! - [`memory`] — in-memory backend with admin writes and fault injection
//! - [`query`] — filters, ordering and limits
//! - [`protocol`] — binary wire protocol (bincode envelope, JSON payloads)
//! - [`server`] — WebSocket server over a memory backend
//! - [`remote`] — WebSocket client backend
//! - [`connectivity`] — host online/offline signal
//! - [`config`] — retry policy and backend switch
//! - [`error`] — backend error codes and transient classification

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod query;
pub mod remote;
pub mod server;
pub mod state;
pub mod sync;

pub use backend::{BackendEvent, CollectionBackend, Listener};
pub use config::{ConfigError, RetryPolicy, SyncConfig};
pub use connectivity::OnlineSignal;
pub use error::{BackendError, ErrorCode, SyncError};
pub use memory::{CollectionStats, MemoryBackend, WriteOp};
pub use protocol::{CollectionMessage, MessageType, ProtocolError, SubscribeRequest};
pub use query::{Direction, Filter, FilterOp, OrderBy, Query, QueryError};
pub use remote::RemoteBackend;
pub use server::{CollectionServer, ServerConfig, ServerStats};
pub use state::{FailureStep, SyncMachine, SyncState};
pub use sync::{ResilientCollectionSync, SyncOptions, SyncView};
