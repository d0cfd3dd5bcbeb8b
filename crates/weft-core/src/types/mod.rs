//! # Core Type Definitions
//!
//! This module contains the record types shared by every layer of the store:
//! - Opaque identifiers (`ProjectId`, `EntityId`, `RelationshipId`, `StampId`,
//!   `ApplicationId`)
//! - Typed attribute values (`AttrValue`, `StoredValue`)
//! - Row records (`Project`, `Entity`, `Relationship`) and their snapshots
//! - Error types (`WeftError`)
//!
//! ## Storage Boundary
//!
//! Attribute values are chosen by the caller as an explicit tagged union or
//! inferred once from a raw JSON value. After that the tag is frozen: what
//! goes into redb is a `StoredValue`, which postcard can encode without
//! self-describing JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Allocate a fresh, time-ordered identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a project. Every entity and relationship is scoped to one.
    ProjectId
);
opaque_id!(
    /// Identifier of an entity (a node in the project graph).
    EntityId
);
opaque_id!(
    /// Identifier of a directed relationship between two entities.
    RelationshipId
);
opaque_id!(
    /// Identifier of a stamp in the catalog.
    StampId
);
opaque_id!(
    /// Identifier of one application of a stamp to an entity.
    ApplicationId
);

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A timestamp strictly after `previous`, tracking the wall clock when it can.
#[must_use]
pub fn advance_millis(previous: u64) -> u64 {
    now_millis().max(previous.saturating_add(1))
}

// =============================================================================
// ATTRIBUTE VALUES
// =============================================================================

/// A typed attribute value.
///
/// JSON form: `{"type": "string" | "number" | "json" | "blob", "value": ...}`.
/// Blob payloads travel as standard base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Number(f64),
    Json(serde_json::Value),
    Blob(#[serde(with = "blob_base64")] Vec<u8>),
}

impl AttrValue {
    /// Infer a type from the shape of a raw JSON value.
    ///
    /// Numbers become `Number`, strings become `String`, everything else
    /// becomes `Json`. Blobs cannot be inferred; they need the tagged form.
    #[must_use]
    pub fn infer(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Json(serde_json::Value::Number(n)),
            },
            other => Self::Json(other),
        }
    }

    /// Read a value from request input: the tagged form wins, anything else
    /// is inferred.
    #[must_use]
    pub fn from_input(raw: serde_json::Value) -> Self {
        if Self::looks_tagged(&raw) {
            if let Ok(tagged) = serde_json::from_value::<Self>(raw.clone()) {
                return tagged;
            }
        }
        Self::infer(raw)
    }

    fn looks_tagged(raw: &serde_json::Value) -> bool {
        let Some(obj) = raw.as_object() else {
            return false;
        };
        obj.len() == 2
            && obj.contains_key("value")
            && matches!(
                obj.get("type").and_then(|t| t.as_str()),
                Some("string" | "number" | "json" | "blob")
            )
    }

    /// Name of the type tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Json(_) => "json",
            Self::Blob(_) => "blob",
        }
    }
}

mod blob_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The persisted form of an [`AttrValue`]. JSON is frozen as its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    String(String),
    Number(f64),
    Json(String),
    Blob(Vec<u8>),
}

impl TryFrom<&AttrValue> for StoredValue {
    type Error = WeftError;

    fn try_from(value: &AttrValue) -> Result<Self, Self::Error> {
        Ok(match value {
            AttrValue::String(s) => Self::String(s.clone()),
            AttrValue::Number(n) => Self::Number(*n),
            AttrValue::Json(v) => Self::Json(
                serde_json::to_string(v)
                    .map_err(|e| WeftError::SerializationError(e.to_string()))?,
            ),
            AttrValue::Blob(b) => Self::Blob(b.clone()),
        })
    }
}

impl TryFrom<StoredValue> for AttrValue {
    type Error = WeftError;

    fn try_from(value: StoredValue) -> Result<Self, Self::Error> {
        Ok(match value {
            StoredValue::String(s) => Self::String(s),
            StoredValue::Number(n) => Self::Number(n),
            StoredValue::Json(text) => Self::Json(
                serde_json::from_str(&text)
                    .map_err(|e| WeftError::DeserializationError(e.to_string()))?,
            ),
            StoredValue::Blob(b) => Self::Blob(b),
        })
    }
}

/// Attributes of one entity (or stamp node), ordered by key.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Encode an attribute map into its stored pairs.
pub fn store_attrs(attrs: &AttrMap) -> Result<Vec<(String, StoredValue)>, WeftError> {
    attrs
        .iter()
        .map(|(k, v)| Ok((k.clone(), StoredValue::try_from(v)?)))
        .collect()
}

/// Decode stored pairs back into an attribute map.
pub fn load_attrs(pairs: Vec<(String, StoredValue)>) -> Result<AttrMap, WeftError> {
    pairs
        .into_iter()
        .map(|(k, v)| Ok((k, AttrValue::try_from(v)?)))
        .collect()
}

// =============================================================================
// ROW RECORDS
// =============================================================================

/// A project: the scope of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: u64,
    pub modified_at: u64,
}

/// An entity row, without its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub project_id: ProjectId,
    pub created_at: u64,
    pub modified_at: u64,
}

/// An entity together with its attributes. This is both what `GET` returns
/// and what a restore body carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(default)]
    pub attrs: AttrMap,
}

/// A directed edge between two entities.
///
/// Endpoints are not checked; callers keep them consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub project_id: ProjectId,
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub kind: String,
    pub label: Option<String>,
    pub binding_name: Option<String>,
    pub from_port: Option<String>,
    pub to_port: Option<String>,
    pub created_at: u64,
}

/// Fields supplied when creating a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub binding_name: Option<String>,
    #[serde(default)]
    pub from_port: Option<String>,
    #[serde(default)]
    pub to_port: Option<String>,
}

/// Marker left on an entity each time a stamp is applied to it.
///
/// Two applications of the same stamp to the same entity are two markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampApplication {
    pub entity_id: EntityId,
    pub stamp_id: StampId,
    pub application_id: ApplicationId,
    pub applied_at: u64,
}

/// Entities, relationships and application markers captured before a
/// structural delete.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub applications: Vec<StampApplication>,
}

/// A project and everything scoped to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    #[serde(flatten)]
    pub graph: GraphSnapshot,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Weft store.
///
/// - Lookups of missing keys are `Ok(None)`, not errors
/// - Handlers turn every variant into a structured condition via `code()`
/// - An empty undo/redo stack is a condition, not an error
#[derive(Debug, Error)]
pub enum WeftError {
    /// The addressed project, entity, relationship, stamp or route is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `beginBatch` while a batch is open.
    #[error("A history batch is already open")]
    AlreadyBatching,

    /// `endBatch` or `cancelBatch` with no open batch.
    #[error("No history batch is open")]
    NotBatching,

    /// The body shape is not recognized by the endpoint.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The body is recognized but its contents are unusable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An undo or redo replay failed; nothing was applied.
    #[error("Replay of history operation {index} failed: {source}")]
    ReplayFailed {
        index: usize,
        source: Box<WeftError>,
    },

    /// The storage engine rejected or failed an operation.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl WeftError {
    /// Stable condition code for structured responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyBatching => "already_batching",
            Self::NotBatching => "not_batching",
            Self::NotImplemented(_) => "not_implemented",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ReplayFailed { .. } => "replay_failed",
            Self::StorageFailure(_) => "storage_failure",
            Self::SerializationError(_) | Self::DeserializationError(_) => "serialization",
            Self::IoError(_) => "io",
        }
    }

    /// HTTP-style status for structured responses.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyBatching | Self::NotBatching | Self::ReplayFailed { .. } => 409,
            Self::NotImplemented(_) => 501,
            Self::InvalidRequest(_) => 400,
            Self::StorageFailure(_)
            | Self::SerializationError(_)
            | Self::DeserializationError(_)
            | Self::IoError(_) => 500,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infer_picks_type_from_shape() {
        assert_eq!(AttrValue::infer(json!("red")), AttrValue::String("red".into()));
        assert_eq!(AttrValue::infer(json!(3)), AttrValue::Number(3.0));
        assert_eq!(
            AttrValue::infer(json!({"a": 1})),
            AttrValue::Json(json!({"a": 1}))
        );
        assert_eq!(AttrValue::infer(json!(true)), AttrValue::Json(json!(true)));
    }

    #[test]
    fn tagged_input_wins_over_inference() {
        let v = AttrValue::from_input(json!({"type": "blob", "value": "AQID"}));
        assert_eq!(v, AttrValue::Blob(vec![1, 2, 3]));

        let v = AttrValue::from_input(json!({"type": "string", "value": "7"}));
        assert_eq!(v, AttrValue::String("7".into()));
    }

    #[test]
    fn type_name_matches_the_json_tag() {
        for value in [
            AttrValue::String("s".into()),
            AttrValue::Number(1.0),
            AttrValue::Json(json!([1])),
            AttrValue::Blob(vec![0]),
        ] {
            let tagged = serde_json::to_value(&value).expect("serialize");
            assert_eq!(tagged["type"], value.type_name());
        }
    }

    #[test]
    fn object_with_unknown_tag_is_plain_json() {
        let raw = json!({"type": "color", "value": "red"});
        assert_eq!(AttrValue::from_input(raw.clone()), AttrValue::Json(raw));
    }

    #[test]
    fn stored_value_freezes_json_as_text() {
        let value = AttrValue::Json(json!({"k": [1, 2]}));
        let stored = StoredValue::try_from(&value).expect("store");
        assert_eq!(stored, StoredValue::Json(r#"{"k":[1,2]}"#.into()));
        assert_eq!(AttrValue::try_from(stored).expect("load"), value);
    }

    #[test]
    fn advance_is_strictly_monotonic() {
        let far_future = now_millis() + 10_000;
        assert_eq!(advance_millis(far_future), far_future + 1);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(WeftError::AlreadyBatching.code(), "already_batching");
        assert_eq!(WeftError::NotFound("x".into()).code(), "not_found");
    }
}
