//! schema validation of rendered documents
use super::{DocumentValidator, ValidationMessage};
use crate::document::Document;
use crate::engine::Cancellation;
use crate::error::RenderError;
use crate::jsonpath::JsonPath;
use crate::scrub;

/// Validate every rendered document, collecting all failures
///
/// Error sections attached to the messages come from the document with every substitution destination scrubbed.
/// When the message itself had to be sanitized the whole section is scrubbed.
pub fn post_validate(
    rendered: &[Document],
    validator: &DocumentValidator,
    cancellation: &Cancellation,
) -> Result<(), RenderError> {
    let mut failures = vec![];

    for document in rendered {
        cancellation.check()?;

        let messages = validator.validate(document);
        if messages.is_empty() {
            continue;
        }

        let redacted = redact_destinations(document);
        failures.extend(
            messages
                .into_iter()
                .map(|message| attach_error_section(message, &redacted)),
        );
    }

    if failures.is_empty() {
        return Ok(());
    }

    for failure in &failures {
        tracing::error!(%failure, "post-validation failure");
    }
    Err(RenderError::InvalidDocumentFormat(failures))
}

/// The whole document with everything a substitution wrote scrubbed
fn redact_destinations(document: &Document) -> serde_json::Value {
    let destinations: Vec<JsonPath> = document
        .substitutions()
        .iter()
        .flat_map(|substitution| substitution.dest.iter())
        .filter_map(|destination| JsonPath::parse(&destination.path).ok())
        .collect();

    let mut redacted = document.clone();
    redacted.set_data(scrub::scrub_paths(document.data(), &destinations));
    if document.is_encrypted() {
        redacted.set_data(scrub::scrub_value(document.data()));
    }
    redacted.into_value()
}

fn attach_error_section(
    mut message: ValidationMessage,
    redacted: &serde_json::Value,
) -> ValidationMessage {
    let pointer = path_to_pointer(&message.path);
    let section = redacted.pointer(&pointer).cloned();

    message.error_section = section.map(|section| {
        if scrub::is_sanitized(&message.message) {
            scrub::scrub_value(&section)
        } else {
            section
        }
    });
    message
}

/// `.data.a.0` -> `/data/a/0`
fn path_to_pointer(path: &str) -> String {
    if path == "." {
        return String::new();
    }

    path.split('.')
        .skip(1)
        .map(|token| format!("/{}", token.replace('~', "~0").replace('/', "~1")))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::validation::DocumentValidator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn validator() -> DocumentValidator {
        DocumentValidator::from_documents(
            &[json!({
                "schema": "deckhand/DataSchema/v1",
                "metadata": {"schema": "metadata/Control/v1", "name": "armada/Chart/v1"},
                "data": {
                    "type": "object",
                    "properties": {
                        "values": {
                            "type": "object",
                            "properties": {"password": {"type": "integer"}, "port": {"type": "integer"}}
                        }
                    }
                }
            })
            .into()],
            None,
        )
        .unwrap()
    }

    fn chart(values: serde_json::Value) -> Document {
        json!({
            "schema": "armada/Chart/v1",
            "metadata": {
                "schema": "metadata/Document/v1", "name": "chart",
                "layeringDefinition": {"layer": "site"},
                "substitutions": [{"src": {"schema": "deckhand/Passphrase/v1", "name": "pw", "path": "."},
                                   "dest": {"path": ".values.password"}}]
            },
            "data": {"values": values}
        })
        .into()
    }

    #[test]
    fn valid() {
        let rendered = [chart(json!({"password": 1, "port": 80}))];
        assert!(post_validate(&rendered, &validator(), &Cancellation::default()).is_ok());
    }

    #[test]
    fn failures_are_scrubbed() {
        let rendered = [chart(json!({"password": "hunter2", "port": 80}))];

        let err = post_validate(&rendered, &validator(), &Cancellation::default()).unwrap_err();
        let messages = err.validation_messages();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].path, ".data.values.password");
        assert_eq!(messages[0].message, scrub::SANITIZED);
        assert_eq!(messages[0].error_section, Some(json!(scrub::SANITIZED)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn cancelled() {
        let cancellation = Cancellation::default();
        cancellation.cancel();

        let rendered = [chart(json!({}))];
        assert!(matches!(
            post_validate(&rendered, &validator(), &cancellation),
            Err(RenderError::Cancelled)
        ));
    }

    #[test]
    fn pointers() {
        assert_eq!(path_to_pointer("."), "");
        assert_eq!(path_to_pointer(".data.a.0"), "/data/a/0");
    }
}
