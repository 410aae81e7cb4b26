//! typed, null-safe view of a single document
//!
//! A document is a mapping with a `schema`, a `metadata` section and an optional `data` section:
//!
//! ```yaml
//! schema: armada/Chart/v1
//! metadata:
//!   schema: metadata/Document/v1
//!   name: keystone
//!   labels:
//!     component: keystone
//!   layeringDefinition:
//!     abstract: false
//!     layer: site
//!     parentSelector:
//!       component: keystone
//!     actions:
//!       - method: merge
//!         path: .
//!   substitutions:
//!     - src: { schema: deckhand/Passphrase/v1, name: keystone-password, path: . }
//!       dest: { path: .values.password }
//!   storagePolicy: cleartext
//! data:
//!   values: {}
//! ```
//!
//! Reads never fail. Missing keys produce empty strings, empty maps, empty lists or `false`.
use crate::secrets;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub const LAYERING_POLICY: &str = "deckhand/LayeringPolicy";
pub const DATA_SCHEMA: &str = "deckhand/DataSchema";
pub const VALIDATION_POLICY: &str = "deckhand/ValidationPolicy";
pub const CONTROL_METADATA: &str = "metadata/Control";

static EMPTY_MAP: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

/// Documents of one render call keyed by identity, in input order
pub type DocumentMap = indexmap::IndexMap<Meta, Document>;

/// Identity of a document within a revision: `(schema, layer, name)`
///
/// Ordering is lexicographic over the tuple and is used to break ties when scheduling.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_new::new,
)]
pub struct Meta {
    pub schema: String,
    pub layer: String,
    pub name: String,
}

impl std::fmt::Display for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.schema, self.layer, self.name)
    }
}

/// Key that substitutions use to name their source: `(schema, name)`
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_new::new,
)]
pub struct SubstitutionKey {
    pub schema: String,
    pub name: String,
}

impl std::fmt::Display for SubstitutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayeringAction {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub src: SubstitutionSource,
    pub dest: Destinations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionSource {
    pub schema: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub match_group: usize,
}

impl SubstitutionSource {
    pub fn key(&self) -> SubstitutionKey {
        SubstitutionKey::new(self.schema.clone(), self.name.clone())
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// `dest` may be written as a single destination or as a list of destinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destinations {
    One(SubstitutionDestination),
    Many(Vec<SubstitutionDestination>),
}

impl Destinations {
    pub fn iter(&self) -> std::slice::Iter<'_, SubstitutionDestination> {
        match self {
            Destinations::One(one) => std::slice::from_ref(one).iter(),
            Destinations::Many(many) => many.iter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionDestination {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurse: Option<Recurse>,
}

/// Apply a destination `pattern` to every string below `dest.path`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurse {
    /// `-1` is unlimited
    pub depth: i64,
}

impl Recurse {
    pub fn max_depth(&self) -> Option<usize> {
        usize::try_from(self.depth).ok()
    }
}

/// A single document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        value.0
    }
}

impl Document {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn schema(&self) -> &str {
        self.0.get("schema").and_then(Value::as_str).unwrap_or("")
    }

    fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata")
    }

    fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata().and_then(|metadata| metadata.get(key))
    }

    fn layering_definition(&self, key: &str) -> Option<&Value> {
        self.metadata_field("layeringDefinition")
            .and_then(|definition| definition.get(key))
    }

    pub fn metadata_schema(&self) -> &str {
        self.metadata_field("schema")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.metadata_field("name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn layer(&self) -> &str {
        self.layering_definition("layer")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn is_abstract(&self) -> bool {
        self.layering_definition("abstract")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_layering_definition(&self) -> bool {
        self.metadata_field("layeringDefinition").is_some()
    }

    pub fn parent_selector(&self) -> &Map<String, Value> {
        self.layering_definition("parentSelector")
            .and_then(Value::as_object)
            .unwrap_or(&EMPTY_MAP)
    }

    pub fn has_parent_selector(&self) -> bool {
        self.layering_definition("parentSelector").is_some()
    }

    pub fn has_actions(&self) -> bool {
        self.layering_definition("actions")
            .and_then(Value::as_array)
            .is_some_and(|actions| !actions.is_empty())
    }

    /// Layering actions in declaration order
    ///
    /// Entries that are not `{method, path}` mappings of strings are skipped; the pre-validator rejects them.
    pub fn actions(&self) -> Vec<LayeringAction> {
        self.layering_definition("actions")
            .and_then(Value::as_array)
            .map(|actions| {
                actions
                    .iter()
                    .filter_map(|action| LayeringAction::deserialize(action).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn labels(&self) -> &Map<String, Value> {
        self.metadata_field("labels")
            .and_then(Value::as_object)
            .unwrap_or(&EMPTY_MAP)
    }

    /// Substitutions in declaration order
    ///
    /// Malformed entries are skipped; the pre-validator rejects them.
    pub fn substitutions(&self) -> Vec<Substitution> {
        self.metadata_field("substitutions")
            .and_then(Value::as_array)
            .map(|substitutions| {
                substitutions
                    .iter()
                    .filter_map(|substitution| Substitution::deserialize(substitution).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_substitutions(&self) -> bool {
        self.metadata_field("substitutions")
            .and_then(Value::as_array)
            .is_some_and(|substitutions| !substitutions.is_empty())
    }

    pub fn storage_policy(&self) -> &str {
        self.metadata_field("storagePolicy")
            .and_then(Value::as_str)
            .unwrap_or("cleartext")
    }

    pub fn is_encrypted(&self) -> bool {
        self.storage_policy() == "encrypted"
    }

    /// Encrypted and `data` holds a reference into an external secret store
    pub fn has_barbican_ref(&self) -> bool {
        self.is_encrypted() && secrets::is_barbican_ref(self.data())
    }

    pub fn is_replacement(&self) -> bool {
        self.metadata_field("replacement")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_control(&self) -> bool {
        self.metadata_schema().starts_with(CONTROL_METADATA)
    }

    pub fn is_layering_policy(&self) -> bool {
        schema_prefix(self.schema()) == Some(LAYERING_POLICY)
    }

    pub fn is_data_schema(&self) -> bool {
        schema_prefix(self.schema()) == Some(DATA_SCHEMA)
    }

    pub fn is_validation_policy(&self) -> bool {
        schema_prefix(self.schema()) == Some(VALIDATION_POLICY)
    }

    /// `null` if there is no `data` section
    pub fn data(&self) -> &Value {
        self.0.get("data").unwrap_or(&Value::Null)
    }

    pub fn set_data(&mut self, data: Value) {
        match &mut self.0 {
            Value::Object(document) => {
                document.insert("data".to_string(), data);
            }
            other => {
                let mut document = Map::new();
                document.insert("data".to_string(), data);
                *other = Value::Object(document);
            }
        }
    }

    pub fn meta(&self) -> Meta {
        Meta::new(
            self.schema().to_string(),
            self.layer().to_string(),
            self.name().to_string(),
        )
    }

    pub fn substitution_key(&self) -> SubstitutionKey {
        SubstitutionKey::new(self.schema().to_string(), self.name().to_string())
    }

    /// SHA-256 over the canonical (key-sorted) JSON of the whole document
    pub fn content_hash(&self) -> String {
        hash_value(&self.0)
    }
}

/// SHA-256 hex digest over the canonical (key-sorted) JSON of `value`
pub fn hash_value(value: &Value) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), canonicalize(&object[key])))
                    .collect(),
            )
        }
        Value::Array(array) => Value::Array(array.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `namespace/Kind` part of `namespace/Kind/vN[.N]`
pub fn schema_prefix(schema: &str) -> Option<&str> {
    schema_parts(schema).map(|(prefix, _)| prefix)
}

/// Split `namespace/Kind/vN[.N]` into `("namespace/Kind", "vN")`
pub fn schema_parts(schema: &str) -> Option<(&str, &str)> {
    let (prefix, version) = schema.rsplit_once('/')?;
    if !prefix.contains('/') || !version.starts_with('v') {
        return None;
    }

    let major = version.split_once('.').map_or(version, |(major, _)| major);
    if major.len() < 2 || !major[1..].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some((prefix, major))
}
