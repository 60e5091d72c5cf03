//! The seam between the sync component and a document backend.
//!
//! A backend hands out listeners: streams of whole-collection snapshots.
//! Every event replaces the previous one completely; there is no
//! incremental patching. Dropping the stream closes the listener.

use futures_util::stream::BoxStream;
use folio_core::RawRecord;

use crate::error::BackendError;
use crate::query::Query;

/// One notification from an open listener.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The full matching document set, in backend order.
    Snapshot(Vec<RawRecord>),
    /// The listener failed. No further events follow.
    Error(BackendError),
}

/// An open listener. Dropping it unsubscribes.
pub type Listener = BoxStream<'static, BackendEvent>;

/// A document backend that can watch collections.
pub trait CollectionBackend: Send + Sync + 'static {
    /// Open a listener on `collection`, optionally restricted by `query`.
    ///
    /// Returns immediately; documents arrive through the stream. An `Err`
    /// means the request itself was rejected (bad collection name, bad
    /// query) and nothing was opened.
    fn subscribe(&self, collection: &str, query: Option<&Query>) -> Result<Listener, BackendError>;
}

/// Reject collection names the backend cannot address.
pub fn check_collection_name(collection: &str) -> Result<(), BackendError> {
    if collection.trim().is_empty() {
        return Err(BackendError::invalid_argument("collection name is empty"));
    }
    if collection.contains('/') {
        return Err(BackendError::invalid_argument(format!(
            "collection name '{collection}' must not contain '/'"
        )));
    }
    Ok(())
}
