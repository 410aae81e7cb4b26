//! secret dereferencing
//!
//! Encrypted documents keep a reference into an external secret store (Barbican) in their `data` section. The
//! rendering core never talks to that store itself: it asks a [SecretResolver] to turn the reference into the
//! actual payload.
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static BARBICAN_REF: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^https?://\S+/[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}/?$",
    )
    .expect("barbican reference pattern must compile")
});

/// A URL whose last path segment looks like a UUID
pub fn is_barbican_ref(value: &Value) -> bool {
    value.as_str().is_some_and(|s| BARBICAN_REF.is_match(s))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SecretError {
    #[error("no secret stored for reference")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Turns a secret reference into its payload
///
/// Implementations may block (network round-trip). They must not log the payload.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Value, SecretError>;
}

impl<F> SecretResolver for F
where
    F: Fn(&str) -> Result<Value, SecretError> + Send + Sync,
{
    fn resolve(&self, reference: &str) -> Result<Value, SecretError> {
        self(reference)
    }
}

/// Secrets that were fetched ahead of time, keyed by reference
#[derive(Default, Clone, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SecretSources(HashMap<String, Value>);

impl SecretSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, payload: impl Into<Value>) {
        self.0.insert(reference.into(), payload.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// payloads stay out of debug output
impl std::fmt::Debug for SecretSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SecretSources {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(reference, payload)| (reference.into(), payload.into()))
                .collect(),
        )
    }
}

impl SecretResolver for SecretSources {
    fn resolve(&self, reference: &str) -> Result<Value, SecretError> {
        self.0.get(reference).cloned().ok_or(SecretError::NotFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const REF: &str = "https://barbican.example:9311/v1/secrets/3f9a1c2e-0b7d-4e55-9a61-2d8c4b7e1f00";

    #[test]
    fn barbican_refs() {
        assert!(is_barbican_ref(&json!(REF)));
        assert!(is_barbican_ref(&json!(
            "http://bar/v1/secrets/3F9A1C2E-0B7D-4E55-9A61-2D8C4B7E1F00"
        )));
        assert!(!is_barbican_ref(&json!("https://bar/v1/secrets/not-a-uuid")));
        assert!(!is_barbican_ref(&json!("my-secret-password")));
        assert!(!is_barbican_ref(&json!({"url": REF})));
    }

    #[test]
    fn sources_resolve() {
        let sources: SecretSources = [(REF, "CERT-BODY")].into_iter().collect();

        assert_eq!(sources.resolve(REF), Ok(json!("CERT-BODY")));
        assert_eq!(sources.resolve("https://other"), Err(SecretError::NotFound));
    }

    #[test]
    fn debug_hides_payloads() {
        let sources: SecretSources = [(REF, "CERT-BODY")].into_iter().collect();
        let debug = format!("{sources:?}");

        assert!(debug.contains(REF));
        assert!(!debug.contains("CERT-BODY"));
    }

    #[test]
    fn closures_resolve() {
        let resolver = |reference: &str| -> Result<Value, SecretError> {
            Ok(Value::String(reference.to_uppercase()))
        };
        assert_eq!(resolver.resolve("abc"), Ok(json!("ABC")));
    }
}
