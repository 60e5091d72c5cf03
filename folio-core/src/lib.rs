//! # folio-core — Record model for the Folio portfolio backend
//!
//! Everything the sync layer needs to turn backend documents into typed,
//! trusted entities lives here:
//!
//! ```text
//! ┌─────────────┐  validate   ┌─────────────┐  deserialize  ┌─────────────┐
//! │ RawRecord   │ ──────────► │ RawRecord   │ ────────────► │ Entity<T>   │
//! │ (backend)   │   (drop ✗)  │ (trusted)   │   (drop ✗)    │ (snapshot)  │
//! └─────────────┘             └─────────────┘               └─────────────┘
//!
//! ┌─────────────────┐  synthetic ids
//! │ FallbackDataset │ ─────────────────────────────────────► Entity<T>
//! └─────────────────┘  fallback-<label>-<index>
//! ```
//!
//! ## Modules
//!
//! - [`record`] — raw backend documents and typed entities
//! - [`validate`] — record validators and snapshot decoding
//! - [`fallback`] — bundled static datasets with synthetic identifiers
//! - [`portfolio`] — project, skill and experience entities

pub mod record;
pub mod validate;
pub mod fallback;
pub mod portfolio;

pub use record::{Entity, RawRecord, SnapshotSource, ID_FIELD};
pub use validate::{decode_records, AcceptAll, FieldKind, RequiredFields, Validator};
pub use fallback::{synthetic_id, FallbackDataset, FallbackError};
pub use portfolio::{CollectionEntity, Experience, Project, Skill};
