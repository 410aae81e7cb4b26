//! collection of documents and the path of the file each came from
//!
//! A file is a YAML stream (`---` separated) or a single JSON value. Empty documents in a stream are skipped. The
//! source path is kept so errors can point at the file a document was read from.
use crate::document::Document;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub type Source = Option<PathBuf>;

#[derive(Default, Debug, Clone)]
pub struct DocumentSet {
    sources: Vec<Source>,
    documents: Vec<(usize, Document)>,
}

impl DocumentSet {
    /// Add a single document
    pub fn insert(&mut self, document: Document, path: impl Into<Source>) {
        let source_index = self.sources.len();
        self.sources.push(path.into());
        self.documents.push((source_index, document));
    }

    /// Add every document of a YAML (or JSON) stream
    pub fn insert_stream(&mut self, contents: &str, path: impl Into<Source>) -> Result<usize, LoadError> {
        let path = path.into();
        let mut parsed = vec![];

        for (position, deserializer) in serde_yaml::Deserializer::from_str(contents).enumerate() {
            let value = Value::deserialize(deserializer)?;
            match value {
                Value::Null => continue,
                Value::Object(_) => parsed.push(Document::from(value)),
                _ => {
                    return Err(LoadError::NotAMapping {
                        source_path: path.clone(),
                        position,
                    })
                }
            }
        }

        let source_index = self.sources.len();
        self.sources.push(path);
        let count = parsed.len();
        self.documents
            .extend(parsed.into_iter().map(|document| (source_index, document)));

        Ok(count)
    }

    pub fn get(&self, index: usize) -> SourceDocument {
        let (source_index, document) = &self.documents[index];
        (index, &self.sources[*source_index], document)
    }

    pub fn iter(&self) -> impl Iterator<Item = SourceDocument> {
        self.documents
            .iter()
            .enumerate()
            .map(|(index, (source_index, document))| (index, &self.sources[*source_index], document))
    }

    /// Where the document with the given identity was loaded from
    pub fn source_of(&self, meta: &crate::document::Meta) -> Option<&Source> {
        self.iter()
            .find(|(_, _, document)| &document.meta() == meta)
            .map(|(_, source, _)| source)
    }

    /// All documents, without their sources
    pub fn to_documents(&self) -> Vec<Document> {
        self.documents
            .iter()
            .map(|(_, document)| document.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl DocumentSet {
    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        let count = self.insert_stream(&file_contents, Some(file_path))?;
        tracing::debug!(count, "documents loaded");
        Ok(())
    }

    /// Load every `.yaml`, `.yml` and `.json` file of a directory (not recursive), in file name order
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut file_paths = vec![];

        let read_dir = std::fs::read_dir(dir_path)?;
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let file_path = dir_entry.path();
            let is_document_file = file_path
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| matches!(extension, "yaml" | "yml" | "json"));
            if is_document_file {
                file_paths.push(file_path);
            }
        }

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound);
        }

        file_paths.sort();
        for file_path in file_paths {
            self.load_file(&file_path)?;
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse yaml")]
    YamlParseFailed(#[from] serde_yaml::Error),
    #[error("Document #{position} of {} is not a mapping", display_source(.source_path))]
    NotAMapping { source_path: Source, position: usize },
}

fn display_source(source: &Source) -> String {
    source
        .as_ref()
        .map_or_else(|| "<inline>".to_string(), |path| path.display().to_string())
}

impl From<Vec<Document>> for DocumentSet {
    fn from(value: Vec<Document>) -> Self {
        let mut set = DocumentSet::default();
        for document in value {
            set.insert(document, None);
        }
        set
    }
}

/// Utility macro to create a [DocumentSet]
///
/// Create from a single YAML stream
/// ```
/// # use deckhand::documents;
/// let set = documents!("
/// schema: example/Kind/v1
/// metadata: {schema: metadata/Document/v1, name: a, layeringDefinition: {layer: site}}
/// ");
/// assert_eq!(set.len(), 1);
/// ```
///
/// Create from multiple streams (path required)
/// ```
/// # use deckhand::documents;
/// let set = documents! {
///   "one.yaml" => "{schema: example/Kind/v1, metadata: {name: one}}",
///   "two.yaml" => "{schema: example/Kind/v1, metadata: {name: two}}"
/// };
/// assert_eq!(set.source_count(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use deckhand::documents;
/// documents!("[not, a, mapping]");
/// ```
#[macro_export]
macro_rules! documents {
    // single stream without source
    { $expr:expr } => {{
        let mut docs = $crate::documents::DocumentSet::default();
        docs.insert_stream($expr, None).expect("stream must parse");
        docs
    }};
    // multiple streams with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::documents::DocumentSet::default();
        $(
            docs.insert_stream($expr, Some(::std::path::PathBuf::from($source))).expect("stream must parse");
        )+

        docs
    }};
}

pub type SourceDocument<'a> = (usize, &'a Source, &'a Document);

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn streams() {
        let documents = documents! {r#"
---
schema: example/Kind/v1
metadata: {schema: metadata/Document/v1, name: a, layeringDefinition: {layer: site}}
---
---
schema: example/Kind/v1
metadata: {schema: metadata/Document/v1, name: b, layeringDefinition: {layer: site}}
data: [1, 2]
"#};

        assert_eq!(documents.len(), 2);
        assert_eq!(documents.source_count(), 1);
        assert_eq!(
            documents.iter().map(|(_, _, document)| document.name()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn sources() {
        let documents = documents! {
            "one.yaml" => "{schema: example/Kind/v1, metadata: {name: one}}",
            "two.json" => r#"{"schema": "example/Kind/v1", "metadata": {"name": "two"}}"#
        };

        let (_, source, document) = documents.get(1);
        assert_eq!(document.name(), "two");
        assert_eq!(source.as_deref(), Some(std::path::Path::new("two.json")));
        assert_eq!(
            documents.source_of(&documents.get(0).2.meta()),
            Some(&Some(std::path::PathBuf::from("one.yaml")))
        );
    }

    #[test]
    fn not_a_mapping() {
        let mut documents = super::DocumentSet::default();
        let err = documents
            .insert_stream("a: 1\n---\n- 1\n- 2\n", None)
            .unwrap_err();

        assert_eq!(err.to_string(), "Document #1 of <inline> is not a mapping");
        assert!(documents.is_empty());
    }

    #[test]
    fn directory() {
        let dir = std::env::temp_dir().join(format!("deckhand-documents-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.yaml"), "{schema: example/Kind/v1, metadata: {name: b}}").unwrap();
        std::fs::write(dir.join("a.json"), r#"{"schema": "example/Kind/v1", "metadata": {"name": "a"}}"#).unwrap();
        std::fs::write(dir.join("ignored.txt"), "not a document").unwrap();

        let mut documents = super::DocumentSet::default();
        documents.load_directory(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let names: Vec<_> = documents.iter().map(|(_, _, document)| document.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
