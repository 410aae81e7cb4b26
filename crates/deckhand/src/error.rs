//! error taxonomy of the rendering core
//!
//! Every variant carries document coordinates ([Meta]) and never document data. Validator messages that would quote
//! the validated value are replaced with [crate::scrub::SANITIZED] before they end up in a [ValidationMessage].
use crate::document::Meta;
use crate::jsonpath::PathError;
use crate::validation::ValidationMessage;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("{}", describe_validation_failure(.0))]
    InvalidDocumentFormat(Vec<ValidationMessage>),

    #[error("invalid document schema `{schema}` for document `{name}`: {reason}")]
    InvalidDocumentSchema {
        schema: String,
        name: String,
        reason: String,
    },

    #[error("document {child} has more than one candidate parent in layer `{layer}`: {}", join_metas(.candidates))]
    IndeterminateDocumentParent {
        child: Meta,
        layer: String,
        candidates: Vec<Meta>,
    },

    #[error("document {child} has an invalid parent {parent}: {reason}")]
    InvalidDocumentParent {
        child: Meta,
        parent: Meta,
        reason: String,
    },

    #[error("document {document} uses layer `{layer}` which is not part of the layer order {layer_order:?}")]
    InvalidDocumentLayer {
        document: Meta,
        layer: String,
        layer_order: Vec<String>,
    },

    #[error("no LayeringPolicy document found")]
    LayeringPolicyNotFound,

    #[error("invalid replacement {document}: {reason}")]
    InvalidDocumentReplacement { document: Meta, reason: String },

    #[error("unsupported layering action method `{method}` in document {document}")]
    UnsupportedActionMethod { document: Meta, method: String },

    #[error("path `{path}` not found while applying `{method}` of document {child} onto parent {parent}")]
    MissingDocumentKey {
        child: Meta,
        parent: Meta,
        method: String,
        path: String,
    },

    #[error("no value at `{path}` to apply pattern `{pattern}` to in document {document}")]
    MissingDocumentPattern {
        document: Meta,
        path: String,
        pattern: String,
    },

    #[error("substitution source [{schema}, {name}] referenced by {document} not found")]
    SubstitutionSourceNotFound {
        document: Meta,
        schema: String,
        name: String,
    },

    #[error("nothing found at `{path}` in substitution source {source_document} referenced by {document}")]
    SubstitutionSourceDataNotFound {
        document: Meta,
        source_document: Meta,
        path: String,
    },

    #[error("secret of encrypted substitution source {source_document} referenced by {document} could not be resolved: {reason}")]
    EncryptionSourceNotFound {
        document: Meta,
        source_document: Meta,
        reason: String,
    },

    #[error("dependency cycle detected: {cycle}")]
    SubstitutionDependencyCycle { cycle: String },

    #[error("substitution into document {document} failed: {message}")]
    UnknownSubstitutionError { document: Meta, message: String },

    #[error("invalid path in document {document}")]
    InvalidPath {
        document: Meta,
        #[source]
        error: PathError,
    },

    #[error("render cancelled")]
    Cancelled,
}

impl RenderError {
    /// Validation messages of an [RenderError::InvalidDocumentFormat], empty for every other variant
    pub fn validation_messages(&self) -> &[ValidationMessage] {
        match self {
            RenderError::InvalidDocumentFormat(messages) => messages,
            _ => &[],
        }
    }
}

fn describe_validation_failure(messages: &[ValidationMessage]) -> String {
    match messages {
        [] => "invalid document format".to_string(),
        [only] => format!("invalid document format: {only}"),
        [first, rest @ ..] => format!(
            "invalid document format: {first} (and {} more)",
            rest.len()
        ),
    }
}

fn join_metas(metas: &[Meta]) -> String {
    metas
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
