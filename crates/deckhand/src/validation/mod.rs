//! document validation
//!
//! Validation happens twice per render:
//!
//! 1. [pre::pre_validate] before anything is rendered: document skeleton, base and metadata schemas, built-in
//!    schemas of control documents, identity uniqueness. The `data` section of regular documents is *not* checked
//!    against DataSchemas yet, substitutions may still fill in required fields.
//! 2. [post::post_validate] on the rendered output: built-in kind schemas (whole document) and registered
//!    DataSchemas (`data` section).
//!
//! The validators used for the second step are collected in a [DocumentValidator] which is rebuilt from the
//! DataSchema documents of every render call. There is no process-wide schema table.
pub mod post;
pub mod pre;
pub mod schemas;

use crate::document::{Document, Meta};
use crate::error::RenderError;
use crate::scrub;
use schemas::{CompiledSchema, SchemaRegistry, Violation};
use serde::Serialize;
use serde_json::Value;

/// External supplier of DataSchema documents
///
/// Called once per render. Implementations are expected to cache.
pub trait DataSchemaProvider: Send + Sync {
    fn list_data_schemas(&self) -> Vec<Document>;
}

/// A single validation failure, located by document coordinates and a path into the document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMessage {
    pub schema: String,
    pub layer: String,
    pub name: String,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_section: Option<Value>,
}

impl std::fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}] {}: {}",
            self.schema, self.layer, self.name, self.path, self.message
        )
    }
}

impl ValidationMessage {
    pub fn new(document: &Document, path: impl Into<String>, message: impl Into<String>) -> Self {
        let Meta {
            schema,
            layer,
            name,
        } = document.meta();

        Self {
            schema,
            layer,
            name,
            path: path.into(),
            message: message.into(),
            validation_schema: None,
            error_section: None,
        }
    }

    fn from_violation(document: &Document, schema: &CompiledSchema, violation: Violation) -> Self {
        let mut message = Self::new(
            document,
            pointer_to_path(&violation.pointer),
            violation.message,
        );
        message.validation_schema = Some(schema.name().to_string());
        message
    }
}

/// `/data/a/0` -> `.data.a.0`
pub fn pointer_to_path(pointer: &str) -> String {
    if pointer.is_empty() {
        return ".".to_string();
    }

    pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .fold(String::new(), |mut path, token| {
            path.push('.');
            path.push_str(&token);
            path
        })
}

/// Validators for rendered documents: built-in kind schemas plus registered DataSchemas
#[derive(Debug, Default)]
pub struct DocumentValidator {
    registry: SchemaRegistry,
}

impl DocumentValidator {
    /// Validator with only the built-in kind schemas
    pub fn builtin_only() -> Self {
        Self::default()
    }

    /// Collect all DataSchema documents from `documents` and `provider`
    pub fn from_documents(
        documents: &[Document],
        provider: Option<&dyn DataSchemaProvider>,
    ) -> Result<Self, RenderError> {
        let mut validator = Self::default();
        let provided = provider
            .map(|provider| provider.list_data_schemas())
            .unwrap_or_default();

        for data_schema in documents
            .iter()
            .chain(provided.iter())
            .filter(|document| document.is_data_schema())
        {
            validator.register(data_schema)?;
        }

        tracing::debug!(count = validator.registry.len(), "data schemas registered");
        Ok(validator)
    }

    /// Register a single DataSchema document
    pub fn register(&mut self, data_schema: &Document) -> Result<(), RenderError> {
        self.registry
            .register(data_schema.name(), data_schema.data())
            .map_err(|reason| RenderError::InvalidDocumentSchema {
                schema: data_schema.schema().to_string(),
                name: data_schema.name().to_string(),
                reason: scrub::sanitize_message(&reason),
            })
    }

    pub fn is_registered(&self, schema: &str) -> bool {
        !self.registry.get(schema).is_empty()
    }

    /// All violations of `document`
    ///
    /// Built-in kind schemas check the whole document, DataSchemas check the `data` section.
    pub fn validate(&self, document: &Document) -> Vec<ValidationMessage> {
        let mut messages = vec![];

        if let Some(builtin) = schemas::builtin_kind(document.schema()) {
            messages.extend(
                builtin
                    .violations(document.as_value())
                    .into_iter()
                    .map(|violation| ValidationMessage::from_violation(document, builtin, violation)),
            );
        }

        for data_schema in self.registry.get(document.schema()) {
            messages.extend(
                data_schema
                    .violations(document.data())
                    .into_iter()
                    .map(|mut violation| {
                        violation.pointer = format!("/data{}", violation.pointer);
                        ValidationMessage::from_violation(document, data_schema, violation)
                    }),
            );
        }

        messages
    }
}
