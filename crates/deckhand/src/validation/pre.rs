//! structural checks that run before rendering
use super::schemas;
use super::ValidationMessage;
use crate::document::{Document, Meta};
use crate::error::RenderError;
use std::collections::HashMap;

/// Collects issues instead of stopping at the first one
#[derive(Debug, Default)]
struct Issues {
    messages: Vec<ValidationMessage>,
}

impl Issues {
    fn log(&mut self, message: ValidationMessage) {
        tracing::trace!(%message, "issue found");
        self.messages.push(message);
    }

    fn extend_from_schema(&mut self, document: &Document, schema: &schemas::CompiledSchema, prefix: &str) {
        for violation in schema.violations(instance_at(document, prefix)) {
            let pointer = format!("{prefix}{}", violation.pointer);
            let mut message = ValidationMessage::new(
                document,
                super::pointer_to_path(&pointer),
                violation.message,
            );
            message.validation_schema = Some(schema.name().to_string());
            self.log(message);
        }
    }
}

fn instance_at<'d>(document: &'d Document, pointer: &str) -> &'d serde_json::Value {
    document
        .as_value()
        .pointer(pointer)
        .unwrap_or(&serde_json::Value::Null)
}

/// Reject documents that cannot be rendered at all
///
/// Fails with [RenderError::InvalidDocumentFormat] listing every issue found, or with
/// [RenderError::InvalidDocumentSchema] for an unknown kind in the reserved `deckhand` namespace.
pub fn pre_validate(documents: &[Document]) -> Result<(), RenderError> {
    let mut issues = Issues::default();
    let mut seen: HashMap<Meta, usize> = HashMap::new();
    let mut layering_policies = 0;

    for (index, document) in documents.iter().enumerate() {
        if !check_skeleton(document, &mut issues) {
            continue;
        }

        issues.extend_from_schema(document, schemas::base(), "");
        if let Some(metadata_schema) = schemas::metadata(document.metadata_schema()) {
            issues.extend_from_schema(document, metadata_schema, "/metadata");
        }

        if document.is_control() {
            if let Some(kind_schema) = schemas::builtin_kind(document.schema()) {
                issues.extend_from_schema(document, kind_schema, "");
            }
        } else {
            check_layering_definition(document, &mut issues);
        }

        if document.is_layering_policy() {
            layering_policies += 1;
            if layering_policies > 1 {
                issues.log(ValidationMessage::new(
                    document,
                    ".",
                    "only one LayeringPolicy may exist",
                ));
            }
        }

        if let Some(existing) = seen.insert(document.meta(), index) {
            issues.log(ValidationMessage::new(
                document,
                ".",
                format!("duplicate document, same identity as document #{existing}"),
            ));
        }
    }

    if !issues.messages.is_empty() {
        tracing::error!(count = issues.messages.len(), "pre-validation failed");
        return Err(RenderError::InvalidDocumentFormat(issues.messages));
    }

    for document in documents {
        let schema = document.schema();
        if schemas::is_reserved_namespace(schema) && schemas::builtin_kind(schema).is_none() {
            return Err(RenderError::InvalidDocumentSchema {
                schema: schema.to_string(),
                name: document.name().to_string(),
                reason: "unknown kind in the reserved `deckhand` namespace".to_string(),
            });
        }
    }

    Ok(())
}

/// Mandatory keys; returns `false` if further checks would be meaningless
fn check_skeleton(document: &Document, issues: &mut Issues) -> bool {
    if !document.as_value().is_object() {
        issues.log(ValidationMessage::new(document, ".", "document must be a mapping"));
        return false;
    }

    let mut complete = true;
    let mut require = |present: bool, path: &str| {
        if !present {
            issues.log(ValidationMessage::new(
                document,
                path,
                format!("`{path}` is required"),
            ));
            complete = false;
        }
    };

    require(!document.schema().is_empty(), ".schema");
    require(!document.metadata_schema().is_empty(), ".metadata.schema");
    require(!document.name().is_empty(), ".metadata.name");
    if !document.is_control() {
        require(
            !document.layer().is_empty(),
            ".metadata.layeringDefinition.layer",
        );
    }

    complete
}

/// `parentSelector` and `actions` come in pairs
fn check_layering_definition(document: &Document, issues: &mut Issues) {
    match (document.has_parent_selector(), document.has_actions()) {
        (true, false) => issues.log(ValidationMessage::new(
            document,
            ".metadata.layeringDefinition.actions",
            "`actions` with at least one entry are required when `parentSelector` is set",
        )),
        (false, true) => issues.log(ValidationMessage::new(
            document,
            ".metadata.layeringDefinition.parentSelector",
            "`parentSelector` is required when `actions` are set",
        )),
        _ => {}
    }
}
