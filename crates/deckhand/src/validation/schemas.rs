//! compiled JSON schemas: the built-in ones and those registered through DataSchema documents
use crate::document::schema_parts;
use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Kinds whose payload is a secret (or a reference to one)
pub const SECRET_KINDS: &[&str] = &[
    "deckhand/Passphrase",
    "deckhand/Certificate",
    "deckhand/CertificateKey",
    "deckhand/CertificateAuthority",
    "deckhand/CertificateAuthorityKey",
    "deckhand/PrivateKey",
    "deckhand/PublicKey",
];

static BUILTINS: LazyLock<Builtins> = LazyLock::new(Builtins::load);

/// Identifies a document kind independent of its minor version: `("namespace/Kind", "vN")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaKey {
    pub prefix: String,
    pub major: String,
}

impl SchemaKey {
    pub fn parse(schema: &str) -> Option<Self> {
        schema_parts(schema).map(|(prefix, major)| Self {
            prefix: prefix.to_string(),
            major: major.to_string(),
        })
    }
}

impl std::fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.prefix, self.major)
    }
}

/// One schema violation: JSON pointer into the instance and the validator's message
///
/// Messages that would quote the instance are replaced with [crate::scrub::SANITIZED].
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub pointer: String,
    pub message: String,
}

pub struct CompiledSchema {
    name: String,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    pub fn compile(name: impl Into<String>, schema: &Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Self {
            name: name.into(),
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn violations(&self, instance: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(instance)
            .map(|error| Violation {
                pointer: error.instance_path.to_string(),
                message: if quotes_instance(&error.kind) {
                    crate::scrub::SANITIZED.to_string()
                } else {
                    error.to_string()
                },
            })
            .collect()
    }
}

/// Everything but the kinds that only name properties or describe the schema itself
fn quotes_instance(kind: &ValidationErrorKind) -> bool {
    !matches!(
        kind,
        ValidationErrorKind::Required { .. }
            | ValidationErrorKind::AdditionalProperties { .. }
            | ValidationErrorKind::UnevaluatedProperties { .. }
            | ValidationErrorKind::Referencing(_)
            | ValidationErrorKind::BacktrackLimitExceeded { .. }
    )
}

struct Builtins {
    base: CompiledSchema,
    metadata_document: CompiledSchema,
    metadata_control: CompiledSchema,
    kinds: HashMap<&'static str, CompiledSchema>,
}

impl Builtins {
    fn load() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            "deckhand/LayeringPolicy",
            builtin("deckhand/LayeringPolicy", include_str!("schemas/layering_policy.yaml")),
        );
        kinds.insert(
            "deckhand/DataSchema",
            builtin("deckhand/DataSchema", include_str!("schemas/data_schema.yaml")),
        );
        kinds.insert(
            "deckhand/ValidationPolicy",
            builtin("deckhand/ValidationPolicy", include_str!("schemas/validation_policy.yaml")),
        );
        for kind in SECRET_KINDS {
            kinds.insert(*kind, builtin(kind, include_str!("schemas/secret.yaml")));
        }

        Self {
            base: builtin("deckhand/Base", include_str!("schemas/base.yaml")),
            metadata_document: builtin(
                "metadata/Document",
                include_str!("schemas/metadata_document.yaml"),
            ),
            metadata_control: builtin(
                "metadata/Control",
                include_str!("schemas/metadata_control.yaml"),
            ),
            kinds,
        }
    }
}

fn builtin(name: &str, source: &str) -> CompiledSchema {
    let schema: Value = serde_yaml::from_str(source).expect("built-in schema must be valid yaml");
    CompiledSchema::compile(name, &schema).expect("built-in schema must compile")
}

pub fn base() -> &'static CompiledSchema {
    &BUILTINS.base
}

/// Schema for the `metadata` section, chosen by `metadata.schema`
pub fn metadata(metadata_schema: &str) -> Option<&'static CompiledSchema> {
    match schema_parts(metadata_schema)?.0 {
        "metadata/Document" => Some(&BUILTINS.metadata_document),
        "metadata/Control" => Some(&BUILTINS.metadata_control),
        _ => None,
    }
}

/// Built-in schema for a whole document of the given kind
pub fn builtin_kind(schema: &str) -> Option<&'static CompiledSchema> {
    let (prefix, _) = schema_parts(schema)?;
    BUILTINS.kinds.get(prefix)
}

/// The `deckhand` namespace is reserved for built-in kinds
pub fn is_reserved_namespace(schema: &str) -> bool {
    schema.starts_with("deckhand/")
}

/// DataSchemas keyed by the kind they validate
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<SchemaKey, Vec<CompiledSchema>>,
}

impl SchemaRegistry {
    /// Register `schema` (a JSON schema for the `data` section) under the kind named by `name`
    pub fn register(&mut self, name: &str, schema: &Value) -> Result<(), String> {
        let key = SchemaKey::parse(name)
            .ok_or_else(|| format!("`{name}` is not of the form namespace/Kind/vN"))?;
        let compiled = CompiledSchema::compile(name, schema)?;

        tracing::debug!(%key, "registered data schema");
        self.schemas.entry(key).or_default().push(compiled);
        Ok(())
    }

    pub fn get(&self, schema: &str) -> &[CompiledSchema] {
        SchemaKey::parse(schema)
            .and_then(|key| self.schemas.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.schemas.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
