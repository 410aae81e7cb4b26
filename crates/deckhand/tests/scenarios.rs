//! End-to-end behaviour of [Engine::render] that is not covered by single fixtures
use deckhand::documents;
use deckhand::secrets::{SecretError, SecretResolver, SecretSources};
use deckhand::{Document, Engine, RenderError, RenderOptions};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const CERT_REF: &str = "https://barbican.example:9311/v1/secrets/0c4e2a9b-5d1f-4e8a-b7c3-9f6d2e1a8b40";

const SITE: &str = r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [global, region, site]}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: base
  labels: {component: base}
  layeringDefinition: {layer: global}
data: {a: {x: 1, y: 1}, b: 1}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: region
  labels: {component: region}
  layeringDefinition:
    layer: region
    parentSelector: {component: base}
    actions: [{method: merge, path: .a}]
data: {a: {y: 2}}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: site
  layeringDefinition:
    layer: site
    parentSelector: {component: region}
    actions: [{method: merge, path: .}]
data: {c: 3}
---
schema: deckhand/Passphrase/v1
metadata:
  schema: metadata/Document/v1
  name: db-password
  layeringDefinition: {layer: site}
data: plaintext-password
---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: db
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: deckhand/Passphrase/v1, name: db-password, path: .}
      dest: {path: .values.password}
    - src: {schema: example/Kind/v1, name: site, path: .a}
      dest: {path: .values.a}
data: {values: {}}
"#;

const ENCRYPTED: &str = r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [site]}
---
schema: deckhand/Certificate/v1
metadata:
  schema: metadata/Document/v1
  name: cert
  storagePolicy: encrypted
  layeringDefinition: {layer: site}
data: https://barbican.example:9311/v1/secrets/0c4e2a9b-5d1f-4e8a-b7c3-9f6d2e1a8b40
---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: ingress
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: deckhand/Certificate/v1, name: cert, path: .}
      dest: {path: .tls.certificate}
data: {tls: {}}
"#;

fn uncached() -> RenderOptions {
    RenderOptions {
        use_cache: false,
        ..Default::default()
    }
}

fn values(rendered: &[Document]) -> Vec<Value> {
    rendered.iter().cloned().map(Document::into_value).collect()
}

fn by_name<'a>(rendered: &'a [Document], name: &str) -> &'a Document {
    rendered
        .iter()
        .find(|document| document.name() == name)
        .unwrap_or_else(|| panic!("{name} not rendered"))
}

fn cert_secrets() -> SecretSources {
    [(CERT_REF, "CERT-BODY")].into_iter().collect()
}

#[test]
fn layered_and_substituted() {
    let documents = documents!(SITE).to_documents();
    let rendered = Engine::default()
        .render(0, &documents, &SecretSources::new(), &uncached())
        .unwrap();

    assert_eq!(
        by_name(&rendered, "site").data(),
        &json!({"a": {"x": 1, "y": 2}, "b": 1, "c": 3})
    );
    assert_eq!(
        by_name(&rendered, "db").data(),
        &json!({"values": {"password": "plaintext-password", "a": {"x": 1, "y": 2}}})
    );
    assert!(rendered.iter().all(|document| !document.is_control()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn input_order_does_not_matter(shuffled in Just(documents!(SITE).to_documents()).prop_shuffle()) {
        let engine = Engine::default();
        let expected = engine
            .render(0, &documents!(SITE).to_documents(), &SecretSources::new(), &uncached())
            .unwrap();
        let rendered = engine
            .render(0, &shuffled, &SecretSources::new(), &uncached())
            .unwrap();

        prop_assert_eq!(values(&rendered), values(&expected));
    }
}

#[test]
fn rendering_rendered_output_changes_nothing() {
    let documents = documents!(SITE).to_documents();
    let engine = Engine::default();
    let first = engine
        .render(0, &documents, &SecretSources::new(), &uncached())
        .unwrap();

    // control documents are not part of the output
    let mut again: Vec<Document> = documents
        .iter()
        .filter(|document| document.is_layering_policy())
        .cloned()
        .collect();
    again.extend(first.iter().cloned());

    let second = engine
        .render(1, &again, &SecretSources::new(), &uncached())
        .unwrap();

    assert_eq!(values(&second), values(&first));
}

#[test]
fn children_of_replaced_parents_build_on_the_replacement() {
    let documents = documents!(
        r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [global, region, site]}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: a
  labels: {component: x}
  layeringDefinition: {layer: global}
data: {x: 1, y: 1}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: a
  replacement: true
  labels: {component: x}
  layeringDefinition:
    layer: region
    parentSelector: {component: x}
    actions: [{method: merge, path: .}]
data: {y: 2}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: b
  layeringDefinition:
    layer: site
    parentSelector: {component: x}
    actions: [{method: merge, path: .}]
data: {z: 3}
---
schema: example/Consumer/v1
metadata:
  schema: metadata/Document/v1
  name: consumer
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: example/Kind/v1, name: a, path: .y}
      dest: {path: .y}
data: {}
"#
    )
    .to_documents();

    let rendered = Engine::default()
        .render(0, &documents, &SecretSources::new(), &uncached())
        .unwrap();

    let identities: Vec<_> = rendered
        .iter()
        .map(|document| (document.schema().to_string(), document.layer().to_string(), document.name().to_string()))
        .collect();
    assert_eq!(
        identities,
        vec![
            ("example/Kind/v1".into(), "region".into(), "a".into()),
            ("example/Consumer/v1".into(), "site".into(), "consumer".into()),
            ("example/Kind/v1".into(), "site".into(), "b".into()),
        ]
    );
    assert_eq!(by_name(&rendered, "a").data(), &json!({"x": 1, "y": 2}));
    assert_eq!(by_name(&rendered, "b").data(), &json!({"x": 1, "y": 2, "z": 3}));
    assert_eq!(by_name(&rendered, "consumer").data(), &json!({"y": 2}));
}

#[test]
fn failed_renders_are_not_cached() {
    let documents = documents!(
        r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [site]}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: a
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: example/Kind/v1, name: b, path: .v}
      dest: {path: .v}
data: {v: 1}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: b
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: example/Kind/v1, name: a, path: .v}
      dest: {path: .v}
data: {v: 2}
"#
    )
    .to_documents();

    let engine = Engine::default();
    let err = engine
        .render(7, &documents, &SecretSources::new(), &engine.default_options())
        .unwrap_err();

    assert!(matches!(err, RenderError::SubstitutionDependencyCycle { .. }), "{err}");
    assert!(engine.cache().is_empty());
    assert!(engine.cache().get(7).is_none());
}

#[test]
fn cached_until_invalidated() {
    let engine = Engine::default();
    let options = engine.default_options();
    let secrets = SecretSources::new();

    let original = documents!(SITE).to_documents();
    let mut changed = original.clone();
    changed.retain(|document| document.name() != "db");

    let first = engine.render(3, &original, &secrets, &options).unwrap();
    let stale = engine.render(3, &changed, &secrets, &options).unwrap();
    assert!(Arc::ptr_eq(&first, &stale));

    engine.invalidate_cache(Some(3));
    let fresh = engine.render(3, &changed, &secrets, &options).unwrap();
    assert_eq!(fresh.len(), first.len() - 1);

    engine.invalidate_cache(None);
    assert!(engine.cache().is_empty());
}

#[test]
fn concurrent_renders_of_a_revision_share_one_result() {
    let documents = documents!(ENCRYPTED).to_documents();
    let engine = Engine::default();
    let resolved = AtomicUsize::new(0);
    let resolver = |reference: &str| -> Result<Value, SecretError> {
        resolved.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        cert_secrets().resolve(reference)
    };

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.render(11, &documents, &resolver, &engine.default_options()).unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(resolved.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(
        by_name(&results[0], "ingress").data(),
        &json!({"tls": {"certificate": "CERT-BODY"}})
    );
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Run `f` with every event (down to TRACE) written to a buffer, returns its result and the log output
fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.contents())
}

const SANITIZED: &str = "Sanitized to avoid exposing secret.";

#[test]
fn secrets_stay_out_of_logs_and_errors() {
    // the certificate ends up where the DataSchema expects a number
    let invalid = format!(
        "{ENCRYPTED}{}",
        r#"
---
schema: deckhand/DataSchema/v1
metadata: {schema: metadata/Control/v1, name: armada/Chart/v1}
data:
  type: object
  properties:
    tls:
      type: object
      properties:
        certificate: {type: integer}
"#
    );

    let ((rendered, err), logs) = with_captured_logs(|| {
        let engine = Engine::default();
        let rendered = engine
            .render(0, &documents!(ENCRYPTED).to_documents(), &cert_secrets(), &uncached())
            .unwrap();
        let err = engine
            .render(1, &documents!(&invalid).to_documents(), &cert_secrets(), &uncached())
            .unwrap_err();
        (rendered, err)
    });

    assert_eq!(
        by_name(&rendered, "ingress").data(),
        &json!({"tls": {"certificate": "CERT-BODY"}})
    );
    assert!(matches!(err, RenderError::InvalidDocumentFormat(_)), "{err}");
    assert!(!err.to_string().contains("CERT-BODY"), "{err}");

    assert!(logs.contains("post-validation failure"), "{logs}");
    assert!(!logs.contains("CERT-BODY"), "{logs}");
}

#[test]
fn validator_messages_never_quote_secrets() {
    let documents = r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [site]}
---
schema: deckhand/Certificate/v1
metadata:
  schema: metadata/Document/v1
  name: cert
  storagePolicy: encrypted
  layeringDefinition: {layer: site}
data: https://barbican.example:9311/v1/secrets/0c4e2a9b-5d1f-4e8a-b7c3-9f6d2e1a8b40
---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: ingress
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: deckhand/Certificate/v1, name: cert, path: .}
      dest: {path: ".tls.certs[0]"}
data: {tls: {}}
---
schema: deckhand/DataSchema/v1
metadata: {schema: metadata/Control/v1, name: armada/Chart/v1}
data:
  type: object
  properties:
    tls:
      type: object
      properties:
        certs:
          contains: {const: other}
          items: false
"#;

    let (err, logs) = with_captured_logs(|| {
        Engine::default()
            .render(0, &documents!(documents).to_documents(), &cert_secrets(), &uncached())
            .unwrap_err()
    });

    let RenderError::InvalidDocumentFormat(failures) = &err else {
        panic!("unexpected error: {err}");
    };
    let paths: Vec<&str> = failures.iter().map(|failure| failure.path.as_str()).collect();
    assert!(paths.contains(&".data.tls.certs"), "{paths:?}");
    assert_eq!(failures.len(), 2, "{paths:?}");
    assert!(failures.iter().all(|failure| failure.message == SANITIZED), "{err}");

    assert!(!err.to_string().contains("CERT-BODY"), "{err}");
    assert!(!logs.contains("CERT-BODY"), "{logs}");
}

#[test]
fn failed_layering_logs_scrubbed_data() {
    let documents = r#"
---
schema: deckhand/LayeringPolicy/v1
metadata: {schema: metadata/Control/v1, name: layering-policy}
data: {layerOrder: [global, site]}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: base
  labels: {component: base}
  layeringDefinition: {layer: global}
data: {a: 1}
---
schema: example/Kind/v1
metadata:
  schema: metadata/Document/v1
  name: site
  layeringDefinition:
    layer: site
    parentSelector: {component: base}
    actions: [{method: replace, path: .missing}]
data: {token: SITE-TOKEN-VALUE}
"#;

    let (err, logs) = with_captured_logs(|| {
        Engine::default()
            .render(0, &documents!(documents).to_documents(), &SecretSources::new(), &uncached())
            .unwrap_err()
    });

    assert!(matches!(err, RenderError::MissingDocumentKey { .. }), "{err}");
    assert!(logs.contains("layering failed"), "{logs}");
    assert!(logs.contains(SANITIZED), "{logs}");
    assert!(!logs.contains("SITE-TOKEN-VALUE"), "{logs}");
    assert!(!err.to_string().contains("SITE-TOKEN-VALUE"), "{err}");
}

#[test]
fn failed_substitution_logs_scrubbed_data() {
    let documents = format!(
        "{ENCRYPTED}{}",
        r#"
---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: proxy
  layeringDefinition: {layer: site}
  substitutions:
    - src: {schema: deckhand/Certificate/v1, name: cert, path: .}
      dest: {path: .tls.certificate}
    - src: {schema: deckhand/Certificate/v1, name: cert, path: .}
      dest: {path: .tls.bundle, pattern: CERT_PLACEHOLDER}
data: {tls: {}}
"#
    );

    let (err, logs) = with_captured_logs(|| {
        Engine::default()
            .render(0, &documents!(&documents).to_documents(), &cert_secrets(), &uncached())
            .unwrap_err()
    });

    assert!(matches!(err, RenderError::MissingDocumentPattern { .. }), "{err}");
    assert!(logs.contains("substitution failed"), "{logs}");
    assert!(logs.contains(SANITIZED), "{logs}");
    assert!(!logs.contains("CERT-BODY"), "{logs}");
    assert!(!err.to_string().contains("CERT-BODY"), "{err}");
}

#[test]
fn cancelled_before_secrets_are_resolved() {
    let documents = documents!(ENCRYPTED).to_documents();
    let options = uncached();
    options.cancellation.cancel();

    let err = Engine::default()
        .render(0, &documents, &cert_secrets(), &options)
        .unwrap_err();

    assert!(matches!(err, RenderError::Cancelled), "{err}");
}
