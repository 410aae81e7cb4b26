//! copying values between documents
//!
//! ```yaml
//! metadata:
//!   substitutions:
//!     - src:
//!         schema: deckhand/Passphrase/v1
//!         name: example-password
//!         path: .
//!       dest:
//!         path: .chart.values.some_url
//!         pattern: INSERT_[A-Z]+_HERE
//! ```
//!
//! Sources are named by `(schema, name)`. [SourceMap] resolves that key to one document of the current render,
//! preferring replacements. Data is always read from the live document set, so a source that was rendered earlier in
//! the same pass is seen with its rendered data.
use crate::document::{Document, DocumentMap, Meta, Substitution, SubstitutionDestination, SubstitutionKey};
use crate::engine::Cancellation;
use crate::error::RenderError;
use crate::jsonpath::JsonPath;
use crate::layering::LayerOrder;
use crate::replacement::Replacements;
use crate::scrub::scrub_value;
use crate::secrets::SecretResolver;
use crate::visit::VisitLeavesMut;
use regex::{NoExpand, Regex};
use serde_json::Value;
use std::collections::HashMap;

/// `(schema, name)` -> the document that provides it
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SourceMap {
    sources: HashMap<SubstitutionKey, Meta>,
}

impl SourceMap {
    /// Every concrete document is a source; replaced documents are rerouted to their replacement
    ///
    /// If several documents share a key the one in the latest layer wins.
    pub fn build(documents: &DocumentMap, order: &LayerOrder, replacements: &Replacements) -> Self {
        let rank = |meta: &Meta| order.index_of(&meta.layer);
        let mut sources: HashMap<SubstitutionKey, Meta> = HashMap::new();

        for (meta, document) in documents {
            if document.is_abstract() {
                continue;
            }

            let key = document.substitution_key();
            let later = sources
                .get(&key)
                .map_or(true, |existing| (rank(meta), meta) > (rank(existing), existing));
            if later {
                sources.insert(key, meta.clone());
            }
        }

        for (replaced, replacement) in replacements.iter() {
            sources.insert(
                SubstitutionKey::new(replaced.schema.clone(), replaced.name.clone()),
                replacement.clone(),
            );
        }

        tracing::debug!(count = sources.len(), "substitution sources");
        Self { sources }
    }

    pub fn resolve(&self, key: &SubstitutionKey) -> Option<&Meta> {
        self.sources.get(key)
    }

    /// Make a freshly rendered document available as a source unless its key is already taken
    pub fn register(&mut self, document: &Document) {
        if document.is_abstract() {
            return;
        }

        self.sources
            .entry(document.substitution_key())
            .or_insert_with(|| document.meta());
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Executes the substitutions of one document at a time
pub struct SubstitutionEngine<'a> {
    sources: SourceMap,
    secrets: &'a dyn SecretResolver,
    permissive: bool,
    cancellation: &'a Cancellation,
}

impl<'a> SubstitutionEngine<'a> {
    pub fn new(
        sources: SourceMap,
        secrets: &'a dyn SecretResolver,
        permissive: bool,
        cancellation: &'a Cancellation,
    ) -> Self {
        Self {
            sources,
            secrets,
            permissive,
            cancellation,
        }
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Apply all substitutions of the document `meta` in place
    ///
    /// The document is registered as a source afterwards.
    pub fn substitute(&mut self, meta: &Meta, documents: &mut DocumentMap) -> Result<(), RenderError> {
        let Some(document) = documents.get(meta) else {
            return Ok(());
        };

        let substitutions = document.substitutions();
        if !substitutions.is_empty() {
            let mut data = document.data().clone();
            for substitution in &substitutions {
                self.apply(meta, substitution, documents, &mut data)
                    .inspect_err(|err| {
                        tracing::error!(
                            document = %meta,
                            data = %scrub_value(&data),
                            "substitution failed: {err}"
                        );
                    })?;
            }

            if let Some(document) = documents.get_mut(meta) {
                document.set_data(data);
            }
        }

        if let Some(document) = documents.get(meta) {
            self.sources.register(document);
        }
        Ok(())
    }

    fn apply(
        &self,
        meta: &Meta,
        substitution: &Substitution,
        documents: &DocumentMap,
        data: &mut Value,
    ) -> Result<(), RenderError> {
        let key = substitution.src.key();
        let Some(source) = self.sources.resolve(&key).and_then(|source| documents.get(source)) else {
            if self.permissive {
                tracing::warn!(document = %meta, source = %key, "substitution source not found, skipping");
                return Ok(());
            }
            return Err(RenderError::SubstitutionSourceNotFound {
                document: meta.clone(),
                schema: key.schema,
                name: key.name,
            });
        };

        let Some(value) = self.source_value(meta, substitution, source)? else {
            return Ok(());
        };

        for destination in substitution.dest.iter() {
            tracing::debug!(
                document = %meta,
                source = %source.meta(),
                src_path = %substitution.src.path,
                dest_path = %destination.path,
                "substituting"
            );
            write_destination(meta, data, destination, &value)?;
        }

        Ok(())
    }

    /// The value a substitution copies, `None` if it should be skipped
    fn source_value(
        &self,
        meta: &Meta,
        substitution: &Substitution,
        source: &Document,
    ) -> Result<Option<Value>, RenderError> {
        let data = if source.has_barbican_ref() {
            self.dereference(meta, source)?
        } else {
            source.data().clone()
        };

        let path = JsonPath::parse(&substitution.src.path).map_err(|error| RenderError::InvalidPath {
            document: meta.clone(),
            error,
        })?;

        // scalars are taken as they are, the path only applies to containers
        let value = match data {
            Value::Object(_) | Value::Array(_) => path.get(&data).cloned(),
            Value::Null => None,
            scalar => Some(scalar),
        };

        let value = match (value, &substitution.src.pattern) {
            (Some(Value::String(text)), Some(pattern)) => {
                let regex = compile(meta, pattern)?;
                regex
                    .captures(&text)
                    .and_then(|captures| captures.get(substitution.src.match_group))
                    .map(|found| Value::String(found.as_str().to_string()))
            }
            (value, _) => value,
        };

        if value.is_some() {
            return Ok(value);
        }

        if self.permissive {
            tracing::warn!(
                document = %meta,
                source = %source.meta(),
                path = %substitution.src.path,
                "nothing found in substitution source, skipping"
            );
            return Ok(None);
        }

        Err(RenderError::SubstitutionSourceDataNotFound {
            document: meta.clone(),
            source_document: source.meta(),
            path: substitution.src.path.clone(),
        })
    }

    fn dereference(&self, meta: &Meta, source: &Document) -> Result<Value, RenderError> {
        self.cancellation.check()?;

        let reference = source.data().as_str().unwrap_or_default();
        tracing::debug!(document = %meta, source = %source.meta(), "resolving secret");

        self.secrets.resolve(reference).map_err(|err| {
            tracing::error!(document = %meta, source = %source.meta(), %err, "secret not resolved");
            RenderError::EncryptionSourceNotFound {
                document: meta.clone(),
                source_document: source.meta(),
                reason: err.to_string(),
            }
        })
    }
}

fn compile(meta: &Meta, pattern: &str) -> Result<Regex, RenderError> {
    Regex::new(pattern).map_err(|err| RenderError::UnknownSubstitutionError {
        document: meta.clone(),
        message: format!("invalid pattern: {err}"),
    })
}

fn write_destination(
    meta: &Meta,
    data: &mut Value,
    destination: &SubstitutionDestination,
    value: &Value,
) -> Result<(), RenderError> {
    let path = JsonPath::parse(&destination.path).map_err(|error| RenderError::InvalidPath {
        document: meta.clone(),
        error,
    })?;

    let Some(pattern) = &destination.pattern else {
        return write(data, &path, value.clone()).map_err(|err| RenderError::UnknownSubstitutionError {
            document: meta.clone(),
            message: err.to_string(),
        });
    };

    let regex = compile(meta, pattern)?;
    let replacement = as_text(value);

    let missing = || RenderError::MissingDocumentPattern {
        document: meta.clone(),
        path: destination.path.clone(),
        pattern: pattern.clone(),
    };
    let target = path.get_mut(data).ok_or_else(missing)?;

    match destination.recurse {
        Some(recurse) => {
            target.visit_leaves_mut_to_depth(recurse.max_depth(), &mut |leaf: &mut Value| {
                if let Value::String(text) = leaf {
                    *text = regex.replace_all(text, NoExpand(&replacement)).into_owned();
                }
            });
        }
        None => {
            let Value::String(text) = target else {
                return Err(RenderError::UnknownSubstitutionError {
                    document: meta.clone(),
                    message: format!("value at `{}` is not a string", destination.path),
                });
            };
            *text = regex.replace_all(text, NoExpand(&replacement)).into_owned();
        }
    }

    Ok(())
}

fn write(data: &mut Value, path: &JsonPath, value: Value) -> Result<(), crate::jsonpath::PathError> {
    if path.is_root() {
        *data = value;
        return Ok(());
    }
    path.set(data, value)
}

/// Strings as they are, anything else as JSON text
fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
