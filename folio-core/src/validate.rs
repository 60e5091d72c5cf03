//! Record validation and snapshot decoding.
//!
//! A validator is a predicate over a [`RawRecord`]. Records that fail it are
//! dropped from the snapshot, never reported as errors: one corrupt document
//! must not take the whole view down.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::record::{Entity, RawRecord};

/// Confirms that a raw record has the shape an entity requires.
pub trait Validator: Send + Sync {
    fn validate(&self, record: &RawRecord) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&RawRecord) -> bool + Send + Sync,
{
    fn validate(&self, record: &RawRecord) -> bool {
        self(record)
    }
}

/// Validator that accepts every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _record: &RawRecord) -> bool {
        true
    }
}

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Any,
    String,
    /// A string with at least one non-whitespace character.
    NonEmptyString,
    Number,
    /// A number within an inclusive range.
    NumberIn(f64, f64),
    /// A whole number that fits an `i64`. Floats such as `50.5` or `50.0`
    /// are rejected, matching serde's integer deserialization.
    Integer,
    /// An integer within an inclusive range.
    IntegerIn(i64, i64),
    Bool,
    Array,
    /// An array whose elements are all strings.
    StringArray,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::NonEmptyString, Value::String(s)) => !s.trim().is_empty(),
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::NumberIn(min, max), Value::Number(n)) => n
                .as_f64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            (FieldKind::Integer, Value::Number(n)) => n.as_i64().is_some(),
            (FieldKind::IntegerIn(min, max), Value::Number(n)) => n
                .as_i64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Array, Value::Array(_)) => true,
            (FieldKind::StringArray, Value::Array(items)) => items.iter().all(Value::is_string),
            (FieldKind::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// Whether a field may be left out of a document.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Presence {
    Required,
    /// Absent or `null`: an `Option` field.
    Optional,
    /// Absent but never `null`: a field with `#[serde(default)]`.
    Defaulted,
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    kind: FieldKind,
    presence: Presence,
}

/// Schema validator: a list of fields that must be present with the given
/// type. Optional fields may be absent or `null`, defaulted fields may only
/// be absent; both must still match their type when present.
///
/// ```
/// use folio_core::{RawRecord, RequiredFields, Validator};
/// use serde_json::json;
///
/// let schema = RequiredFields::new()
///     .non_empty_string("title")
///     .optional_string("githubUrl");
///
/// assert!(schema.validate(&RawRecord::from_value("a", json!({"title": "Folio"}))));
/// assert!(!schema.validate(&RawRecord::from_value("b", json!({"title": ""}))));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    rules: Vec<FieldRule>,
}

impl RequiredFields {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(mut self, name: impl Into<String>, kind: FieldKind, presence: Presence) -> Self {
        self.rules.push(FieldRule {
            name: name.into(),
            kind,
            presence,
        });
        self
    }

    /// Require `name` with the given kind.
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.rule(name, kind, Presence::Required)
    }

    /// Allow `name` to be missing or null; type-check it otherwise.
    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.rule(name, kind, Presence::Optional)
    }

    /// Allow `name` to be missing, but not null.
    pub fn defaulted(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.rule(name, kind, Presence::Defaulted)
    }

    pub fn string(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::String)
    }

    pub fn non_empty_string(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::NonEmptyString)
    }

    pub fn number(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Number)
    }

    pub fn number_in(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.field(name, FieldKind::NumberIn(min, max))
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Integer)
    }

    pub fn integer_in(self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.field(name, FieldKind::IntegerIn(min, max))
    }

    pub fn bool(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Bool)
    }

    pub fn array(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Array)
    }

    pub fn string_array(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::StringArray)
    }

    pub fn object(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::Object)
    }

    pub fn optional_string(self, name: impl Into<String>) -> Self {
        self.optional(name, FieldKind::String)
    }

    /// Number of field rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Validator for RequiredFields {
    fn validate(&self, record: &RawRecord) -> bool {
        self.rules.iter().all(|rule| match (record.get(&rule.name), rule.presence) {
            (None, presence) => presence != Presence::Required,
            (Some(Value::Null), presence) => presence == Presence::Optional,
            (Some(value), _) => rule.kind.matches(value),
        })
    }
}

/// Turn a backend document set into snapshot entities.
///
/// Records are kept in arrival order. A record is dropped when it fails the
/// validator, when it does not deserialize into `T`, or when its id repeats
/// an earlier record's id.
pub fn decode_records<T>(records: &[RawRecord], validator: &dyn Validator) -> Vec<Entity<T>>
where
    T: DeserializeOwned,
{
    let mut seen = HashSet::with_capacity(records.len());
    let mut entities = Vec::with_capacity(records.len());

    for record in records {
        if !validator.validate(record) {
            log::debug!("Dropping record {}: failed validation", record.id);
            continue;
        }
        if seen.contains(record.id.as_str()) {
            log::warn!("Dropping record {}: duplicate id in snapshot", record.id);
            continue;
        }
        match serde_json::from_value::<T>(record.to_document()) {
            Ok(data) => {
                seen.insert(record.id.as_str());
                entities.push(Entity::new(record.id.clone(), data));
            }
            Err(e) => {
                log::debug!("Dropping record {}: {e}", record.id);
            }
        }
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Titled {
        title: String,
    }

    fn record(id: &str, value: Value) -> RawRecord {
        RawRecord::from_value(id, value)
    }

    #[test]
    fn test_closure_validator() {
        let has_title = |r: &RawRecord| r.get("title").is_some();
        assert!(has_title.validate(&record("a", json!({"title": "x"}))));
        assert!(!has_title.validate(&record("b", json!({}))));
    }

    #[test]
    fn test_required_fields_types() {
        let schema = RequiredFields::new()
            .string("name")
            .number_in("level", 0.0, 100.0)
            .array("tags")
            .bool("featured");

        assert!(schema.validate(&record(
            "ok",
            json!({"name": "Rust", "level": 90, "tags": [], "featured": true})
        )));
        assert!(!schema.validate(&record(
            "level",
            json!({"name": "Rust", "level": 120, "tags": [], "featured": true})
        )));
        assert!(!schema.validate(&record(
            "tags",
            json!({"name": "Rust", "level": 10, "tags": "x", "featured": true})
        )));
        assert!(!schema.validate(&record("missing", json!({"name": "Rust"}))));
    }

    #[test]
    fn test_optional_fields() {
        let schema = RequiredFields::new().optional_string("url");
        assert!(schema.validate(&record("absent", json!({}))));
        assert!(schema.validate(&record("null", json!({"url": null}))));
        assert!(schema.validate(&record("set", json!({"url": "https://x"}))));
        assert!(!schema.validate(&record("wrong", json!({"url": 3}))));
    }

    #[test]
    fn test_integer_kinds_reject_floats() {
        let schema = RequiredFields::new().integer_in("level", 0, 100).integer("order");
        assert!(schema.validate(&record("ok", json!({"level": 50, "order": -3}))));
        assert!(!schema.validate(&record("frac", json!({"level": 50.5, "order": 1}))));
        assert!(!schema.validate(&record("whole", json!({"level": 50.0, "order": 1}))));
        assert!(!schema.validate(&record("range", json!({"level": 101, "order": 1}))));
        assert!(!schema.validate(&record("big", json!({"level": 1, "order": u64::MAX}))));
    }

    #[test]
    fn test_string_array() {
        let schema = RequiredFields::new().string_array("tags");
        assert!(schema.validate(&record("empty", json!({"tags": []}))));
        assert!(schema.validate(&record("ok", json!({"tags": ["a", "b"]}))));
        assert!(!schema.validate(&record("mixed", json!({"tags": ["a", 2]}))));
        assert!(!schema.validate(&record("scalar", json!({"tags": "a"}))));
    }

    #[test]
    fn test_defaulted_fields_reject_null() {
        let schema = RequiredFields::new().defaulted("featured", FieldKind::Bool);
        assert!(schema.validate(&record("absent", json!({}))));
        assert!(schema.validate(&record("set", json!({"featured": false}))));
        assert!(!schema.validate(&record("null", json!({"featured": null}))));
        assert!(!schema.validate(&record("wrong", json!({"featured": "yes"}))));
    }

    #[test]
    fn test_non_empty_string_rejects_whitespace() {
        let schema = RequiredFields::new().non_empty_string("title");
        assert!(!schema.validate(&record("ws", json!({"title": "   "}))));
    }

    #[test]
    fn test_decode_keeps_only_valid() {
        let schema = RequiredFields::new().non_empty_string("title");
        let records = vec![
            record("1", json!({"title": "A"})),
            record("2", json!({"title": ""})),
            record("3", json!({"other": true})),
            record("4", json!({"title": "D"})),
        ];

        let entities: Vec<Entity<Titled>> = decode_records(&records, &schema);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "1");
        assert_eq!(entities[1].id, "4");
        assert_eq!(entities[1].data.title, "D");
    }

    #[test]
    fn test_decode_drops_undeserializable() {
        // Passes the validator but `title` has the wrong type for `Titled`.
        let records = vec![record("1", json!({"title": 7}))];
        let entities: Vec<Entity<Titled>> = decode_records(&records, &AcceptAll);
        assert!(entities.is_empty());
    }

    #[test]
    fn test_decode_drops_duplicate_ids() {
        let records = vec![
            record("same", json!({"title": "first"})),
            record("same", json!({"title": "second"})),
        ];
        let entities: Vec<Entity<Titled>> = decode_records(&records, &AcceptAll);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].data.title, "first");
    }

    #[test]
    fn test_decode_preserves_arrival_order() {
        let records: Vec<RawRecord> = ["c", "a", "b"]
            .iter()
            .map(|id| record(id, json!({"title": id})))
            .collect();
        let entities: Vec<Entity<Titled>> = decode_records(&records, &AcceptAll);
        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
