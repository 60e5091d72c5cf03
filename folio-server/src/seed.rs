//! Seed files: a JSON object mapping collection names to document arrays.
//!
//! ```json
//! { "projects": [ { "id": "folio", "title": "Folio", ... } ] }
//! ```
//!
//! A document's `id` field becomes its backend id and is removed from the
//! body. Documents without one get `<collection>-<index>`.

use std::collections::BTreeMap;
use std::path::Path;

use folio_core::{RawRecord, ID_FIELD};
use folio_sync::{BackendError, MemoryBackend};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Seed rejected by backend: {0}")]
    Backend(#[from] BackendError),
}

/// Parse seed JSON into per-collection record lists, sorted by collection.
pub fn parse_seed(json: &str) -> Result<Vec<(String, Vec<RawRecord>)>, SeedError> {
    let collections: BTreeMap<String, Vec<Map<String, Value>>> = serde_json::from_str(json)?;
    Ok(collections
        .into_iter()
        .map(|(collection, docs)| {
            let records = docs
                .into_iter()
                .enumerate()
                .map(|(index, mut fields)| {
                    let id = match fields.remove(ID_FIELD) {
                        Some(Value::String(id)) if !id.trim().is_empty() => id,
                        _ => format!("{collection}-{index}"),
                    };
                    RawRecord::new(id, fields)
                })
                .collect();
            (collection, records)
        })
        .collect())
}

/// Replace each seeded collection in `backend`. Returns the number of
/// documents loaded.
pub fn load_seed(backend: &MemoryBackend, json: &str) -> Result<usize, SeedError> {
    let mut total = 0;
    for (collection, records) in parse_seed(json)? {
        let count = records.len();
        backend.load(&collection, records)?;
        log::info!("Seeded '{collection}' with {count} documents");
        total += count;
    }
    Ok(total)
}

pub fn load_seed_file(backend: &MemoryBackend, path: impl AsRef<Path>) -> Result<usize, SeedError> {
    let json = std::fs::read_to_string(path)?;
    load_seed(backend, &json)
}
