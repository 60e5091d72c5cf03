//! Backend documents and the typed entities built from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field under which a document's backend identifier is merged.
pub const ID_FIELD: &str = "id";

/// A document exactly as the backend delivered it.
///
/// The identifier is kept apart from the fields; the backend assigns it and
/// it is never part of the stored document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON value. Non-object values yield an empty
    /// field map, which every non-trivial validator rejects.
    pub fn from_value(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    /// Look up a single field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The document with its identifier merged under [`ID_FIELD`].
    ///
    /// A stored `id` field is overwritten: the backend identifier wins.
    pub fn to_document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(doc)
    }
}

/// One validated record in a snapshot.
///
/// `data` is flattened on serialization so an entity renders as the
/// document itself plus its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Entity<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Where the entities of a snapshot came from. A snapshot never mixes
/// sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Nothing received yet.
    #[default]
    Empty,
    /// Validated documents from the live collection.
    Live,
    /// The bundled fallback dataset.
    Fallback,
}
