//! Fixture tests
//!
//! Renders `renders/*/input.yaml` (with the secrets of an optional `secrets.yaml` next to it) and compares the
//! output with `expected.yaml`, or the error with `error.txt`.
use deckhand::documents::DocumentSet;
use deckhand::secrets::SecretSources;
use deckhand::{Document, Engine};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::path::Path;

fn read_stream(path: &Path) -> Vec<Value> {
    let mut documents = DocumentSet::default();
    documents.load_file(path).expect("fixture must load");
    documents
        .to_documents()
        .into_iter()
        .map(Document::into_value)
        .collect()
}

#[test]
fn renders() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("DECKHAND_LOG"))
        .with_writer(std::io::stderr)
        .try_init();

    insta::glob!("renders/*/input.yaml", |path| {
        let fixture = path.parent().expect("fixture directory");

        let mut documents = DocumentSet::default();
        documents.load_file(path).expect("input must load");
        let documents = documents.to_documents();

        let secrets_path = fixture.join("secrets.yaml");
        let secrets: SecretSources = if secrets_path.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(&secrets_path).unwrap()).unwrap()
        } else {
            SecretSources::new()
        };

        let engine = Engine::default();
        let result = engine.render(0, &documents, &secrets, &engine.default_options());

        let expected_error = fixture.join("error.txt");
        if expected_error.exists() {
            let expected = std::fs::read_to_string(&expected_error).unwrap();
            let err = result.expect_err("render must fail");
            assert_eq!(err.to_string(), expected.trim(), "{}", fixture.display());
            return;
        }

        let rendered: Vec<Value> = result
            .unwrap_or_else(|err| panic!("{}: {err}", fixture.display()))
            .iter()
            .cloned()
            .map(Document::into_value)
            .collect();
        let expected = read_stream(&fixture.join("expected.yaml"));

        assert_eq!(rendered, expected, "{}", fixture.display());
    });
}
