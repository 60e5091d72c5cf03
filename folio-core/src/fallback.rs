//! Bundled static datasets served when no live connection exists.
//!
//! Fallback items carry no backend identity, so each one gets a synthetic
//! id `fallback-<label>-<index>` derived from its position. The ids are
//! deterministic and unique within a dataset, which keeps the snapshot
//! identity invariant intact in degraded mode.

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::record::Entity;

/// Synthetic identifier for the fallback item at `index`.
pub fn synthetic_id(label: &str, index: usize) -> String {
    format!("fallback-{label}-{index}")
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("Failed to read fallback data: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid fallback data: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A fixed list of entities for one collection.
#[derive(Debug, Clone)]
pub struct FallbackDataset<T> {
    label: String,
    items: Vec<T>,
}

impl<T> FallbackDataset<T> {
    pub fn new(label: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            label: label.into(),
            items,
        }
    }

    /// Dataset with no items; degraded mode then renders an empty list.
    pub fn empty(label: impl Into<String>) -> Self {
        Self::new(label, Vec::new())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> FallbackDataset<T> {
    /// The dataset as snapshot entities, in input order.
    pub fn entities(&self) -> Vec<Entity<T>> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| Entity::new(synthetic_id(&self.label, index), item.clone()))
            .collect()
    }
}

impl<T: DeserializeOwned> FallbackDataset<T> {
    /// Parse a JSON array of items.
    pub fn from_json_str(label: impl Into<String>, json: &str) -> Result<Self, FallbackError> {
        let items: Vec<T> = serde_json::from_str(json)?;
        Ok(Self::new(label, items))
    }

    /// Load a JSON array of items from disk.
    pub fn from_json_file(
        label: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, FallbackError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(label, &json)
    }
}
