//! Portfolio entities: the three collections the site renders and the admin
//! panel edits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::validate::{FieldKind, RequiredFields};

/// An entity type bound to a named backend collection.
pub trait CollectionEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Backend collection name.
    const COLLECTION: &'static str;
    /// Singular label used in diagnostics and fallback ids.
    const LABEL: &'static str;

    /// Shape a raw document must have to become this entity. A document
    /// passes exactly when it deserializes into `Self`.
    fn schema() -> RequiredFields;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub featured: bool,
    /// Display position; lower sorts first when a query orders by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl CollectionEntity for Project {
    const COLLECTION: &'static str = "projects";
    const LABEL: &'static str = "project";

    fn schema() -> RequiredFields {
        RequiredFields::new()
            .non_empty_string("title")
            .non_empty_string("description")
            .string_array("technologies")
            .optional_string("githubUrl")
            .optional_string("liveUrl")
            .optional_string("imageUrl")
            .defaulted("featured", FieldKind::Bool)
            .optional("order", FieldKind::Integer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    pub category: String,
    /// Proficiency, 0 to 100.
    pub level: u8,
}

impl CollectionEntity for Skill {
    const COLLECTION: &'static str = "skills";
    const LABEL: &'static str = "skill";

    fn schema() -> RequiredFields {
        RequiredFields::new()
            .non_empty_string("name")
            .non_empty_string("category")
            .integer_in("level", 0, 100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub company: String,
    pub role: String,
    pub start_date: String,
    /// `None` for the current position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl CollectionEntity for Experience {
    const COLLECTION: &'static str = "experience";
    const LABEL: &'static str = "experience";

    fn schema() -> RequiredFields {
        RequiredFields::new()
            .non_empty_string("company")
            .non_empty_string("role")
            .non_empty_string("startDate")
            .optional_string("endDate")
            .defaulted("description", FieldKind::String)
            .defaulted("highlights", FieldKind::StringArray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Entity, RawRecord};
    use crate::validate::{decode_records, AcceptAll, Validator};
    use serde_json::{json, Value};

    /// The schema and serde agree on `value`: it validates exactly when it
    /// decodes on its own.
    #[track_caller]
    fn assert_schema_matches_decode<T: CollectionEntity>(value: Value) {
        let record = RawRecord::from_value("r", value);
        let valid = T::schema().validate(&record);
        let decodes = decode_records::<T>(std::slice::from_ref(&record), &AcceptAll).len() == 1;
        assert_eq!(valid, decodes, "{:?}", record.fields);
        let kept = decode_records::<T>(std::slice::from_ref(&record), &T::schema()).len();
        assert_eq!(kept, usize::from(valid));
    }

    #[test]
    fn test_project_schema() {
        let schema = Project::schema();
        let valid = RawRecord::from_value(
            "p1",
            json!({
                "title": "Folio",
                "description": "Portfolio site",
                "technologies": ["Rust", "Tokio"],
                "githubUrl": "https://github.com/example/folio"
            }),
        );
        let no_description = RawRecord::from_value(
            "p2",
            json!({"title": "Folio", "technologies": []}),
        );
        let bad_url = RawRecord::from_value(
            "p3",
            json!({"title": "Folio", "description": "x", "technologies": [], "githubUrl": 5}),
        );

        assert!(schema.validate(&valid));
        assert!(!schema.validate(&no_description));
        assert!(!schema.validate(&bad_url));
    }

    #[test]
    fn test_project_decodes_camel_case() {
        let record = RawRecord::from_value(
            "p1",
            json!({
                "title": "Folio",
                "description": "Portfolio site",
                "technologies": ["Rust"],
                "liveUrl": "https://folio.example",
                "featured": true,
                "order": 2
            }),
        );
        let entities: Vec<Entity<Project>> = decode_records(&[record], &Project::schema());
        assert_eq!(entities.len(), 1);
        let project = &entities[0].data;
        assert_eq!(project.live_url.as_deref(), Some("https://folio.example"));
        assert!(project.featured);
        assert_eq!(project.order, Some(2));
    }

    #[test]
    fn test_skill_level_bounds() {
        let schema = Skill::schema();
        let ok = RawRecord::from_value("s1", json!({"name": "Rust", "category": "Languages", "level": 95}));
        let high = RawRecord::from_value("s2", json!({"name": "Rust", "category": "Languages", "level": 101}));
        let negative = RawRecord::from_value("s3", json!({"name": "Rust", "category": "Languages", "level": -1}));

        assert!(schema.validate(&ok));
        assert!(!schema.validate(&high));
        assert!(!schema.validate(&negative));
    }

    #[test]
    fn test_experience_current_position() {
        let record = RawRecord::from_value(
            "e1",
            json!({"company": "Acme", "role": "Engineer", "startDate": "2023-01", "endDate": null}),
        );
        assert!(Experience::schema().validate(&record));

        let entities: Vec<Entity<Experience>> = decode_records(&[record], &Experience::schema());
        assert_eq!(entities[0].data.end_date, None);
        assert!(entities[0].data.highlights.is_empty());
    }

    #[test]
    fn test_schemas_accept_exactly_what_decodes() {
        let skill = |level: Value| json!({"name": "Rust", "category": "lang", "level": level});
        for level in [json!(0), json!(100), json!(50.5), json!(50.0), json!(-1), json!(256), json!("9")] {
            assert_schema_matches_decode::<Skill>(skill(level));
        }

        assert_schema_matches_decode::<Project>(
            json!({"title": "T", "description": "D", "technologies": [1, 2], "featured": "yes"}),
        );
        assert_schema_matches_decode::<Project>(
            json!({"title": "T", "description": "D", "technologies": ["rust"], "featured": null}),
        );
        assert_schema_matches_decode::<Project>(
            json!({"title": "T", "description": "D", "technologies": ["rust"], "order": 1.5}),
        );
        assert_schema_matches_decode::<Project>(
            json!({"title": "T", "description": "D", "technologies": [], "order": null}),
        );

        let experience = |extra: Value| {
            let mut doc = json!({"company": "Acme", "role": "Engineer", "startDate": "2023-01"});
            if let (Value::Object(doc), Value::Object(extra)) = (&mut doc, extra) {
                doc.extend(extra);
            }
            doc
        };
        assert_schema_matches_decode::<Experience>(experience(json!({"description": null})));
        assert_schema_matches_decode::<Experience>(experience(json!({"description": 3})));
        assert_schema_matches_decode::<Experience>(experience(json!({"highlights": ["a", 1]})));
        assert_schema_matches_decode::<Experience>(experience(json!({"highlights": ["shipped"]})));
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Project::COLLECTION, "projects");
        assert_eq!(Skill::LABEL, "skill");
        assert_eq!(Experience::COLLECTION, "experience");
    }
}
