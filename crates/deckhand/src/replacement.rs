//! replacement documents
//!
//! A child with `replacement: true` takes over the identity `(schema, name)` of its parent. Rules:
//!
//! - a replacement must have a parent with the same `schema` and `metadata.name`
//! - a child that is not a replacement must not share `schema` and `metadata.name` with its parent
//! - a replacement cannot itself be replaced
//! - a parent is replaced at most once
use crate::document::{DocumentMap, Meta};
use crate::error::RenderError;
use crate::layering::Parents;
use std::collections::HashMap;

/// Replaced parent -> its replacement
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Replacements {
    replaced_by: HashMap<Meta, Meta>,
}

impl Replacements {
    /// Check the replacement rules over all parent/child pairs
    pub fn check(documents: &DocumentMap, parents: &Parents) -> Result<Self, RenderError> {
        let mut replacements = Self::default();

        let mut children: Vec<&Meta> = documents.keys().collect();
        children.sort();

        for meta in children {
            let child = &documents[meta];
            let parent = parents
                .get(meta)
                .and_then(|parent| documents.get_key_value(parent));

            let invalid = |reason: String| RenderError::InvalidDocumentReplacement {
                document: meta.clone(),
                reason,
            };

            let Some((parent_meta, parent)) = parent else {
                if child.is_replacement() {
                    return Err(invalid("replacement has no parent".to_string()));
                }
                continue;
            };

            let same_identity = child.substitution_key() == parent.substitution_key();

            if !child.is_replacement() {
                if same_identity {
                    return Err(invalid(format!(
                        "shares schema and name with its parent {parent_meta} but is not marked as a replacement"
                    )));
                }
                continue;
            }

            if !same_identity {
                return Err(invalid(format!(
                    "parent {parent_meta} has a different schema or name"
                )));
            }
            if parent.is_replacement() {
                return Err(invalid(format!(
                    "parent {parent_meta} is itself a replacement and cannot be replaced"
                )));
            }
            if let Some(existing) = replacements.replaced_by.get(parent_meta) {
                return Err(invalid(format!(
                    "parent {parent_meta} is already replaced by {existing}"
                )));
            }

            tracing::debug!(document = %meta, parent = %parent_meta, "replacement");
            replacements
                .replaced_by
                .insert(parent_meta.clone(), meta.clone());
        }

        Ok(replacements)
    }

    pub fn replacement_of(&self, meta: &Meta) -> Option<&Meta> {
        self.replaced_by.get(meta)
    }

    pub fn is_replaced(&self, meta: &Meta) -> bool {
        self.replaced_by.contains_key(meta)
    }

    /// The document that stands in for `meta`: its replacement if there is one
    pub fn resolve<'a>(&'a self, meta: &'a Meta) -> &'a Meta {
        self.replaced_by.get(meta).unwrap_or(meta)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Meta, &Meta)> {
        self.replaced_by.iter()
    }

    pub fn len(&self) -> usize {
        self.replaced_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replaced_by.is_empty()
    }
}
