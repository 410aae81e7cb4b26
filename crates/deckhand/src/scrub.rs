//! keeping secrets out of logs, errors and (optionally) output
//!
//! - [scrub_value] replaces every leaf with [SANITIZED]. Containers stay so the structure remains readable.
//! - [sanitize_message] replaces validator messages that quote the offending value.
//! - [redact_documents] replaces secrets in rendered output with their SHA-256 digest.
use crate::document::{hash_value, Document, SubstitutionKey};
use crate::jsonpath::JsonPath;
use crate::visit::VisitLeavesMut;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

pub const SANITIZED: &str = "Sanitized to avoid exposing secret.";

/// Validator messages that embed the instance value
static SECRET_EXPOSING_MESSAGES: LazyLock<regex::RegexSet> = LazyLock::new(|| {
    regex::RegexSet::new([
        r"(?s)^.* is not of types? .+$",
        r"(?s)^.* is too (short|long)$",
        r"(?s)^.* is (shorter|longer) than .+$",
        r"(?s)^.* is less than (or equal to )?the minimum of .+$",
        r"(?s)^.* is greater than (or equal to )?the maximum of .+$",
        r"(?s)^.* does not match .+$",
        r"(?s)^.* is not one of .+$",
        r"(?s)^.* was expected$",
        r"(?s)^.* is not a multiple of .+$",
        r"(?s)^.* is not a .+$",
        r"(?s)^.* has (less|fewer|more) than .+$",
        r"(?s)^.* has non-unique elements$",
        r"(?s)^.* is not valid under any of .+$",
        r"(?s)^.* is valid under (more than one|each) of .+$",
        r"(?s)^.* is not allowed for .+$",
        r"(?s)^None of .+ are valid under the given schema$",
        r"(?s)^False schema does not allow .+$",
        r"(?s)^(Additional|Unevaluated) items are not allowed .+$",
        r"(?s)^.* is not compliant with .+$",
    ])
    .expect("sanitizer patterns must compile")
});

/// Copy of `value` with every leaf primitive replaced by [SANITIZED]
pub fn scrub_value(value: &Value) -> Value {
    let mut scrubbed = value.clone();
    scrubbed.visit_leaves_mut(&mut |leaf: &mut Value| *leaf = Value::from(SANITIZED));
    scrubbed
}

/// Copy of `value` where everything below the given paths is scrubbed
pub fn scrub_paths<'p>(value: &Value, paths: impl IntoIterator<Item = &'p JsonPath>) -> Value {
    let mut scrubbed = value.clone();
    for path in paths {
        if let Some(target) = path.get_mut(&mut scrubbed) {
            *target = scrub_value(target);
        }
    }
    scrubbed
}

/// Returns [SANITIZED] for messages that would quote a (potentially secret) value
pub fn sanitize_message(message: &str) -> String {
    if SECRET_EXPOSING_MESSAGES.is_match(message) {
        SANITIZED.to_string()
    } else {
        message.to_string()
    }
}

pub fn is_sanitized(message: &str) -> bool {
    message == SANITIZED
}

/// Redact secrets from rendered documents
///
/// - encrypted documents: `data` becomes the digest of `data`
/// - documents substituting from an encrypted source: every `dest.path` of such a substitution becomes the digest
///   of the value found there
///
/// `sources` are all documents that may have acted as substitution sources (usually the unrendered input).
pub fn redact_documents(rendered: &[Document], sources: &[Document]) -> Vec<Document> {
    let encrypted: HashSet<SubstitutionKey> = sources
        .iter()
        .chain(rendered)
        .filter(|document| document.is_encrypted())
        .map(Document::substitution_key)
        .collect();

    rendered
        .iter()
        .map(|document| redact_document(document, &encrypted))
        .collect()
}

pub fn redact_document(document: &Document, encrypted: &HashSet<SubstitutionKey>) -> Document {
    let mut redacted = document.clone();

    if document.is_encrypted() {
        redacted.set_data(Value::String(hash_value(document.data())));
        return redacted;
    }

    let mut data = document.data().clone();
    for substitution in document.substitutions() {
        if !encrypted.contains(&substitution.src.key()) {
            continue;
        }

        for destination in substitution.dest.iter() {
            let Ok(path) = JsonPath::parse(&destination.path) else {
                continue;
            };
            if let Some(target) = path.get_mut(&mut data) {
                *target = Value::String(hash_value(target));
            }
        }
    }
    redacted.set_data(data);

    redacted
}
