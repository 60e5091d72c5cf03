//! In-memory document store with fan-out change notification.
//!
//! Each collection is a room: an ordered document list plus a tokio
//! broadcast channel. Every write re-broadcasts the whole collection, so a
//! listener only ever sees complete snapshots.
//!
//! ```text
//!  admin write ──► CollectionRoom ──► broadcast(Arc<Vec<RawRecord>>)
//!                   │ docs (ordered)        │         │         │
//!                   │ fault                 ▼         ▼         ▼
//!                   └──────────────────  listener  listener  listener
//!                                        (query)   (query)   (query)
//! ```
//!
//! Writes broadcast while still holding the document lock, and listeners
//! register under the read lock, so a listener never misses or reorders a
//! change relative to its initial snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use folio_core::RawRecord;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::backend::{check_collection_name, BackendEvent, CollectionBackend, Listener};
use crate::error::BackendError;
use crate::query::Query;

/// Default per-listener buffer, in snapshots.
pub const DEFAULT_CAPACITY: usize = 64;

/// An admin edit to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WriteOp {
    /// Insert with a generated id.
    Add {
        collection: String,
        fields: Map<String, Value>,
    },
    /// Insert or replace.
    Set {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    /// Merge fields into an existing document.
    Update {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            Self::Add { collection, .. }
            | Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone)]
enum CollectionEvent {
    Changed(Arc<Vec<RawRecord>>),
    Failed(BackendError),
}

/// Per-collection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub documents: usize,
    pub listeners: usize,
    pub subscriptions_opened: u64,
    pub writes: u64,
}

struct CollectionRoom {
    docs: RwLock<Vec<RawRecord>>,
    sender: broadcast::Sender<CollectionEvent>,
    fault: RwLock<Option<BackendError>>,
    subscriptions_opened: AtomicU64,
    writes: AtomicU64,
}

impl CollectionRoom {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            docs: RwLock::new(Vec::new()),
            sender,
            fault: RwLock::new(None),
            subscriptions_opened: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Mutate the document list and broadcast the result under one lock.
    fn write<R>(&self, f: impl FnOnce(&mut Vec<RawRecord>) -> R) -> R {
        let mut docs = write_lock(&self.docs);
        let result = f(&mut docs);
        self.writes.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error for a store.
        let _ = self
            .sender
            .send(CollectionEvent::Changed(Arc::new(docs.clone())));
        result
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn check_document_id(id: &str) -> Result<(), BackendError> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(BackendError::invalid_argument(format!(
            "invalid document id '{id}'"
        )));
    }
    Ok(())
}

/// An in-memory [`CollectionBackend`] with admin writes and fault injection.
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Arc<CollectionRoom>>>,
    capacity: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is how many snapshots a slow listener may fall behind
    /// before it skips to newer ones.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn room(&self, collection: &str) -> Arc<CollectionRoom> {
        // Fast path: read lock
        {
            let rooms = read_lock(&self.collections);
            if let Some(room) = rooms.get(collection) {
                return room.clone();
            }
        }

        let mut rooms = write_lock(&self.collections);
        rooms
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(CollectionRoom::new(self.capacity)))
            .clone()
    }

    fn existing_room(&self, collection: &str) -> Option<Arc<CollectionRoom>> {
        read_lock(&self.collections).get(collection).cloned()
    }

    /// Insert a document under a generated id and return the id.
    pub fn add(&self, collection: &str, fields: Map<String, Value>) -> Result<String, BackendError> {
        check_collection_name(collection)?;
        let id = Uuid::new_v4().simple().to_string();
        let record = RawRecord::new(id.clone(), fields);
        self.room(collection).write(|docs| docs.push(record));
        log::debug!("Added document {id} to {collection}");
        Ok(id)
    }

    /// Insert or replace a document. A replaced document keeps its position.
    pub fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), BackendError> {
        check_collection_name(collection)?;
        check_document_id(id)?;
        self.room(collection).write(|docs| {
            match docs.iter_mut().find(|r| r.id == id) {
                Some(existing) => existing.fields = fields,
                None => docs.push(RawRecord::new(id, fields)),
            }
        });
        Ok(())
    }

    /// Merge `fields` into an existing document.
    pub fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), BackendError> {
        check_collection_name(collection)?;
        check_document_id(id)?;
        let room = self
            .existing_room(collection)
            .ok_or_else(|| BackendError::not_found(format!("{collection}/{id}")))?;

        // Check before taking the write path so a miss does not broadcast.
        if !read_lock(&room.docs).iter().any(|r| r.id == id) {
            return Err(BackendError::not_found(format!("{collection}/{id}")));
        }

        room.write(|docs| {
            if let Some(existing) = docs.iter_mut().find(|r| r.id == id) {
                existing.fields.extend(fields);
            }
        });
        Ok(())
    }

    /// Remove a document. Returns whether it existed.
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, BackendError> {
        check_collection_name(collection)?;
        check_document_id(id)?;
        let Some(room) = self.existing_room(collection) else {
            return Ok(false);
        };
        if !read_lock(&room.docs).iter().any(|r| r.id == id) {
            return Ok(false);
        }
        room.write(|docs| docs.retain(|r| r.id != id));
        Ok(true)
    }

    /// Replace a whole collection in one write.
    pub fn load(&self, collection: &str, records: Vec<RawRecord>) -> Result<(), BackendError> {
        check_collection_name(collection)?;
        for record in &records {
            check_document_id(&record.id)?;
        }
        self.room(collection).write(|docs| *docs = records);
        Ok(())
    }

    /// Apply an admin edit. Returns the id of the affected document.
    pub fn apply(&self, op: WriteOp) -> Result<String, BackendError> {
        match op {
            WriteOp::Add { collection, fields } => self.add(&collection, fields),
            WriteOp::Set {
                collection,
                id,
                fields,
            } => self.set(&collection, &id, fields).map(|_| id),
            WriteOp::Update {
                collection,
                id,
                fields,
            } => self.update(&collection, &id, fields).map(|_| id),
            WriteOp::Delete { collection, id } => {
                if self.delete(&collection, &id)? {
                    Ok(id)
                } else {
                    Err(BackendError::not_found(format!("{collection}/{id}")))
                }
            }
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<RawRecord> {
        let room = self.existing_room(collection)?;
        let docs = read_lock(&room.docs);
        docs.iter().find(|r| r.id == id).cloned()
    }

    /// One-shot read, optionally through a query.
    pub fn list(&self, collection: &str, query: Option<&Query>) -> Result<Vec<RawRecord>, BackendError> {
        check_collection_name(collection)?;
        if let Some(query) = query {
            query
                .validate()
                .map_err(|e| BackendError::invalid_argument(e.to_string()))?;
        }
        let Some(room) = self.existing_room(collection) else {
            return Ok(Vec::new());
        };
        let docs = read_lock(&room.docs);
        Ok(match query {
            Some(query) => query.apply(&docs),
            None => docs.clone(),
        })
    }

    /// Make the collection fail: open listeners receive `error`, and every
    /// new subscription fails with it until [`clear_fault`](Self::clear_fault).
    pub fn set_fault(&self, collection: &str, error: BackendError) {
        let room = self.room(collection);
        *write_lock(&room.fault) = Some(error.clone());
        let _ = room.sender.send(CollectionEvent::Failed(error));
        log::debug!("Fault injected on {collection}");
    }

    pub fn clear_fault(&self, collection: &str) {
        if let Some(room) = self.existing_room(collection) {
            *write_lock(&room.fault) = None;
        }
    }

    /// Fail the currently open listeners once; new subscriptions succeed.
    /// Returns how many listeners were failed.
    pub fn fail_listeners(&self, collection: &str, error: BackendError) -> usize {
        self.existing_room(collection)
            .map(|room| room.sender.send(CollectionEvent::Failed(error)).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of open listeners on a collection.
    pub fn listener_count(&self, collection: &str) -> usize {
        self.existing_room(collection)
            .map(|room| room.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Total subscriptions ever requested on a collection, failed or not.
    pub fn subscriptions_opened(&self, collection: &str) -> u64 {
        self.existing_room(collection)
            .map(|room| room.subscriptions_opened.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn stats(&self, collection: &str) -> CollectionStats {
        match self.existing_room(collection) {
            Some(room) => CollectionStats {
                documents: read_lock(&room.docs).len(),
                listeners: room.sender.receiver_count(),
                subscriptions_opened: room.subscriptions_opened.load(Ordering::Relaxed),
                writes: room.writes.load(Ordering::Relaxed),
            },
            None => CollectionStats::default(),
        }
    }

    /// Names of all collections touched so far.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.collections).keys().cloned().collect();
        names.sort();
        names
    }
}

impl CollectionBackend for MemoryBackend {
    fn subscribe(&self, collection: &str, query: Option<&Query>) -> Result<Listener, BackendError> {
        check_collection_name(collection)?;
        if let Some(query) = query {
            query
                .validate()
                .map_err(|e| BackendError::invalid_argument(e.to_string()))?;
        }

        let room = self.room(collection);
        room.subscriptions_opened.fetch_add(1, Ordering::Relaxed);

        if let Some(fault) = read_lock(&room.fault).clone() {
            log::debug!("Subscription on {collection} failed: {fault}");
            return Ok(stream::once(async move { BackendEvent::Error(fault) }).boxed());
        }

        let (rx, initial) = {
            let docs = read_lock(&room.docs);
            let rx = room.sender.subscribe();
            let initial = match query {
                Some(q) => q.apply(&docs),
                None => docs.clone(),
            };
            (rx, initial)
        };

        let query = query.cloned();
        let updates = stream::unfold(Some(rx), move |state| {
            let query = query.clone();
            async move {
                let mut rx = state?;
                loop {
                    match rx.recv().await {
                        Ok(CollectionEvent::Changed(docs)) => {
                            let records = match &query {
                                Some(q) => q.apply(&docs),
                                None => docs.as_ref().clone(),
                            };
                            return Some((BackendEvent::Snapshot(records), Some(rx)));
                        }
                        Ok(CollectionEvent::Failed(error)) => {
                            return Some((BackendEvent::Error(error), None));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::debug!("Listener lagged, skipped {skipped} snapshots");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream::once(async move { BackendEvent::Snapshot(initial) })
            .chain(updates)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::query::FilterOp;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn snapshot_ids(event: Option<BackendEvent>) -> Vec<String> {
        match event {
            Some(BackendEvent::Snapshot(records)) => records.into_iter().map(|r| r.id).collect(),
            other => panic!("Expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_add_set_get() {
        let store = MemoryBackend::new();
        let id = store.add("projects", fields(json!({"title": "A"}))).unwrap();
        store.set("projects", "fixed", fields(json!({"title": "B"}))).unwrap();

        assert_eq!(store.get("projects", &id).unwrap().fields["title"], "A");
        assert_eq!(store.get("projects", "fixed").unwrap().fields["title"], "B");
        assert!(store.get("projects", "missing").is_none());
        assert!(store.get("skills", "fixed").is_none());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let store = MemoryBackend::new();
        store.set("projects", "a", fields(json!({"title": "A"}))).unwrap();
        store.set("projects", "b", fields(json!({"title": "B"}))).unwrap();
        store.set("projects", "a", fields(json!({"title": "A2"}))).unwrap();

        let docs = store.list("projects", None).unwrap();
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].fields["title"], "A2");
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_update_merges_and_requires_existing() {
        let store = MemoryBackend::new();
        store.set("projects", "a", fields(json!({"title": "A", "order": 1}))).unwrap();
        store.update("projects", "a", fields(json!({"order": 5}))).unwrap();

        let doc = store.get("projects", "a").unwrap();
        assert_eq!(doc.fields["title"], "A");
        assert_eq!(doc.fields["order"], 5);

        let missing = store.update("projects", "zzz", Map::new()).unwrap_err();
        assert_eq!(missing.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_delete() {
        let store = MemoryBackend::new();
        store.set("skills", "rust", fields(json!({"name": "Rust"}))).unwrap();
        assert!(store.delete("skills", "rust").unwrap());
        assert!(!store.delete("skills", "rust").unwrap());
        assert!(!store.delete("nothing", "rust").unwrap());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let store = MemoryBackend::new();
        assert!(store.add("", Map::new()).is_err());
        assert!(store.set("projects", "a/b", Map::new()).is_err());
        assert!(store.subscribe("bad/name", None).is_err());
    }

    #[test]
    fn test_apply_write_ops() {
        let store = MemoryBackend::new();
        let id = store
            .apply(WriteOp::Add {
                collection: "projects".into(),
                fields: fields(json!({"title": "A"})),
            })
            .unwrap();
        store
            .apply(WriteOp::Update {
                collection: "projects".into(),
                id: id.clone(),
                fields: fields(json!({"featured": true})),
            })
            .unwrap();
        assert_eq!(store.get("projects", &id).unwrap().fields["featured"], true);

        let deleted = store
            .apply(WriteOp::Delete {
                collection: "projects".into(),
                id: id.clone(),
            })
            .unwrap();
        assert_eq!(deleted, id);

        let again = store.apply(WriteOp::Delete {
            collection: "projects".into(),
            id,
        });
        assert_eq!(again.unwrap_err().code, ErrorCode::NotFound);
    }

    #[test]
    fn test_list_with_query() {
        let store = MemoryBackend::new();
        store.set("projects", "a", fields(json!({"featured": true}))).unwrap();
        store.set("projects", "b", fields(json!({"featured": false}))).unwrap();

        let q = Query::new().filter("featured", FilterOp::Eq, json!(true));
        let docs = store.list("projects", Some(&q)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");

        let bad = Query::new().limit(0);
        assert_eq!(store.list("projects", Some(&bad)).unwrap_err().code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_subscribe_initial_then_updates() {
        let store = MemoryBackend::new();
        store.set("projects", "a", fields(json!({"title": "A"}))).unwrap();

        let mut listener = store.subscribe("projects", None).unwrap();
        assert_eq!(snapshot_ids(listener.next().await), vec!["a"]);

        store.set("projects", "b", fields(json!({"title": "B"}))).unwrap();
        assert_eq!(snapshot_ids(listener.next().await), vec!["a", "b"]);

        store.delete("projects", "a").unwrap();
        assert_eq!(snapshot_ids(listener.next().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_subscribe_applies_query_to_updates() {
        let store = MemoryBackend::new();
        let q = Query::new().filter("featured", FilterOp::Eq, json!(true));
        let mut listener = store.subscribe("projects", Some(&q)).unwrap();
        assert!(snapshot_ids(listener.next().await).is_empty());

        store.set("projects", "a", fields(json!({"featured": false}))).unwrap();
        assert!(snapshot_ids(listener.next().await).is_empty());

        store.set("projects", "b", fields(json!({"featured": true}))).unwrap();
        assert_eq!(snapshot_ids(listener.next().await), vec!["b"]);
    }

    #[tokio::test]
    async fn test_fault_fails_listeners_and_new_subscriptions() {
        let store = MemoryBackend::new();
        let mut open = store.subscribe("projects", None).unwrap();
        let _ = open.next().await;

        store.set_fault("projects", BackendError::unavailable("maintenance"));

        match open.next().await {
            Some(BackendEvent::Error(e)) => assert_eq!(e.code, ErrorCode::Unavailable),
            other => panic!("Expected error, got {other:?}"),
        }
        // A failed listener ends.
        assert!(open.next().await.is_none());

        let mut fresh = store.subscribe("projects", None).unwrap();
        assert!(matches!(fresh.next().await, Some(BackendEvent::Error(_))));
        assert!(fresh.next().await.is_none());

        store.clear_fault("projects");
        let mut healed = store.subscribe("projects", None).unwrap();
        assert!(matches!(healed.next().await, Some(BackendEvent::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_fail_listeners_is_one_shot() {
        let store = MemoryBackend::new();
        let mut listener = store.subscribe("skills", None).unwrap();
        let _ = listener.next().await;

        assert_eq!(store.fail_listeners("skills", BackendError::network("reset")), 1);
        assert!(matches!(listener.next().await, Some(BackendEvent::Error(_))));

        let mut next = store.subscribe("skills", None).unwrap();
        assert!(matches!(next.next().await, Some(BackendEvent::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_listener_count_tracks_drops() {
        let store = MemoryBackend::new();
        let first = store.subscribe("projects", None).unwrap();
        let second = store.subscribe("projects", None).unwrap();
        assert_eq!(store.listener_count("projects"), 2);
        assert_eq!(store.subscriptions_opened("projects"), 2);

        drop(first);
        assert_eq!(store.listener_count("projects"), 1);
        drop(second);
        assert_eq!(store.listener_count("projects"), 0);
        assert_eq!(store.subscriptions_opened("projects"), 2);
    }

    #[test]
    fn test_stats_and_names() {
        let store = MemoryBackend::new();
        store.set("skills", "a", Map::new()).unwrap();
        store.set("projects", "a", Map::new()).unwrap();
        store.set("projects", "b", Map::new()).unwrap();

        let stats = store.stats("projects");
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.listeners, 0);
        assert_eq!(store.collection_names(), vec!["projects", "skills"]);
        assert_eq!(store.stats("nope"), CollectionStats::default());
    }
}
