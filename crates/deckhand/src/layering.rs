//! parent discovery and application of layering actions
//!
//! A child names its parent indirectly: `parentSelector` must be a subset of the parent's `labels`, the parent must
//! share the child's `schema` and live in a strictly earlier layer of the LayeringPolicy's `layerOrder`. Among all
//! candidates the one in the latest layer wins.
//!
//! The child's rendered data starts as a copy of the parent's (already rendered) data. Each action then copies,
//! merges or deletes the subtree at its `path`:
//!
//! | method    | effect                                                                         |
//! |-----------|--------------------------------------------------------------------------------|
//! | `merge`   | child subtree merged onto the parent's; non-objects are taken from the child   |
//! | `replace` | child subtree overwrites the parent's                                          |
//! | `delete`  | subtree removed from the rendered data, `.` empties it to `{}`                 |
use crate::document::{Document, DocumentMap, Meta};
use crate::error::RenderError;
use crate::jsonpath::JsonPath;
use crate::merge::{deep_delete, deep_merge};
use crate::scrub::scrub_value;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Child identity -> parent identity
pub type Parents = HashMap<Meta, Meta>;

/// `layerOrder` of the LayeringPolicy, most abstract layer first
#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct LayerOrder {
    layers: Vec<String>,
}

impl LayerOrder {
    /// Read the layer order from the (single) LayeringPolicy among `documents`
    pub fn from_documents<'d>(
        documents: impl IntoIterator<Item = &'d Document>,
    ) -> Result<Self, RenderError> {
        let policy = documents
            .into_iter()
            .find(|document| document.is_layering_policy())
            .ok_or(RenderError::LayeringPolicyNotFound)?;

        let layers = policy
            .data()
            .get("layerOrder")
            .and_then(Value::as_array)
            .map(|layers| {
                layers
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let order = Self::new(layers);
        tracing::debug!(layers = ?order.layers, "layer order");
        Ok(order)
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn index_of(&self, layer: &str) -> Option<usize> {
        self.layers.iter().position(|candidate| candidate == layer)
    }

    /// Every non-control document must use a layer of this order
    pub fn check_layers<'d>(
        &self,
        documents: impl IntoIterator<Item = &'d Document>,
    ) -> Result<(), RenderError> {
        for document in documents {
            if document.is_control() || self.index_of(document.layer()).is_some() {
                continue;
            }

            return Err(RenderError::InvalidDocumentLayer {
                document: document.meta(),
                layer: document.layer().to_string(),
                layer_order: self.layers.clone(),
            });
        }

        Ok(())
    }
}

/// `(label key, label value)` -> documents carrying that label
///
/// Values are indexed by their JSON text so non-string label values still compare exactly.
struct LabelIndex<'d> {
    entries: HashMap<(&'d str, String), Vec<&'d Meta>>,
}

impl<'d> LabelIndex<'d> {
    fn build(documents: &'d DocumentMap) -> Self {
        let mut entries: HashMap<(&str, String), Vec<&Meta>> = HashMap::new();
        for (meta, document) in documents {
            if document.is_control() {
                continue;
            }
            for (key, value) in document.labels() {
                entries
                    .entry((key.as_str(), value.to_string()))
                    .or_default()
                    .push(meta);
            }
        }

        Self { entries }
    }

    /// Documents whose labels contain every entry of `selector`
    fn matching(&self, selector: &Map<String, Value>) -> Vec<&'d Meta> {
        let mut entries = selector.iter().map(|(key, value)| {
            self.entries
                .get(&(key.as_str(), value.to_string()))
                .map(Vec::as_slice)
                .unwrap_or(&[])
        });

        let Some(first) = entries.next() else {
            return vec![];
        };
        let rest: Vec<_> = entries.collect();

        first
            .iter()
            .filter(|meta| rest.iter().all(|other| other.contains(*meta)))
            .copied()
            .collect()
    }
}

/// Find the parent of every layered document
///
/// A document in a non-top layer without `parentSelector` is not layered. A selector that matches nothing is
/// tolerated with a warning. Two candidates in the winning layer fail with
/// [RenderError::IndeterminateDocumentParent].
pub fn discover_parents(
    documents: &DocumentMap,
    order: &LayerOrder,
) -> Result<Parents, RenderError> {
    let index = LabelIndex::build(documents);
    let mut parents = Parents::new();

    let mut children: Vec<(&Meta, &Document)> = documents
        .iter()
        .filter(|(_, document)| !document.is_control())
        .collect();
    children.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (meta, child) in children {
        let Some(child_layer) = order.index_of(child.layer()) else {
            continue;
        };

        let selector = child.parent_selector();
        if selector.is_empty() {
            if child_layer > 0 {
                tracing::debug!(document = %meta, "no parentSelector, not layered");
            }
            continue;
        }

        let mut candidates: Vec<(usize, &Meta)> = index
            .matching(selector)
            .into_iter()
            .filter(|candidate| candidate.schema == meta.schema)
            .filter_map(|candidate| {
                let layer = order.index_of(&candidate.layer)?;
                (layer < child_layer).then_some((layer, candidate))
            })
            .collect();

        let Some(latest) = candidates.iter().map(|(layer, _)| *layer).max() else {
            tracing::warn!(document = %meta, "no parent found for parentSelector, not layered");
            continue;
        };

        candidates.retain(|(layer, _)| *layer == latest);
        candidates.sort();

        if let [(_, parent)] = candidates.as_slice() {
            tracing::trace!(document = %meta, parent = %parent, "parent found");
            parents.insert(meta.clone(), (*parent).clone());
            continue;
        }

        let candidates: Vec<Meta> = candidates
            .into_iter()
            .map(|(_, candidate)| candidate.clone())
            .collect();
        tracing::error!(document = %meta, count = candidates.len(), "more than one parent");
        return Err(RenderError::IndeterminateDocumentParent {
            child: meta.clone(),
            layer: order.layers()[latest].clone(),
            candidates,
        });
    }

    Ok(parents)
}

/// Parent and child must share a schema and the parent must live in an earlier layer
pub fn check_parent(
    child: &Document,
    parent: &Document,
    order: &LayerOrder,
) -> Result<(), RenderError> {
    let invalid = |reason: &str| RenderError::InvalidDocumentParent {
        child: child.meta(),
        parent: parent.meta(),
        reason: reason.to_string(),
    };

    if child.schema() != parent.schema() {
        return Err(invalid("parent has a different schema"));
    }

    match (order.index_of(parent.layer()), order.index_of(child.layer())) {
        (Some(parent_layer), Some(child_layer)) if parent_layer < child_layer => Ok(()),
        _ => Err(invalid("parent is not in an earlier layer")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Merge,
    Replace,
    Delete,
}

impl std::str::FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Method::Merge),
            "replace" => Ok(Method::Replace),
            "delete" => Ok(Method::Delete),
            _ => Err(()),
        }
    }
}

/// Action paths are relative to `data`: `.data.a`, `$.data.a` and `.a` all address the same value
pub fn normalize_action_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);

    let relative = match path.strip_prefix(".data") {
        Some(rest) if rest.is_empty() || rest.starts_with('.') || rest.starts_with('[') => rest,
        _ => path,
    };

    if relative.is_empty() {
        ".".to_string()
    } else {
        relative.to_string()
    }
}

/// Rendered data of `child` on top of the (rendered) `parent`
///
/// Failures are logged with scrubbed copies of both data sections.
pub fn layer_document(child: &Document, parent: &Document) -> Result<Value, RenderError> {
    let mut rendered = parent.data().clone();

    for action in child.actions() {
        rendered = apply_action(child, parent, &action.method, &action.path, rendered)
            .inspect_err(|err| {
                tracing::error!(
                    child = %child.meta(),
                    parent = %parent.meta(),
                    child_data = %scrub_value(child.data()),
                    parent_data = %scrub_value(parent.data()),
                    "layering failed: {err}"
                );
            })?;
    }

    Ok(rendered)
}

fn apply_action(
    child: &Document,
    parent: &Document,
    method: &str,
    path: &str,
    rendered: Value,
) -> Result<Value, RenderError> {
    let Ok(parsed_method) = method.parse::<Method>() else {
        return Err(RenderError::UnsupportedActionMethod {
            document: child.meta(),
            method: method.to_string(),
        });
    };

    let path = JsonPath::parse(&normalize_action_path(path)).map_err(|error| {
        RenderError::InvalidPath {
            document: child.meta(),
            error,
        }
    })?;
    tracing::trace!(child = %child.meta(), method, %path, "applying action");

    let missing = || RenderError::MissingDocumentKey {
        child: child.meta(),
        parent: parent.meta(),
        method: method.to_string(),
        path: path.to_string(),
    };
    let invalid_path = |error| RenderError::InvalidPath {
        document: child.meta(),
        error,
    };

    let mut rendered = object_or_empty(rendered);
    let child_data = object_or_empty(child.data().clone());

    match parsed_method {
        Method::Delete => {
            deep_delete(&mut rendered, &path).ok_or_else(missing)?;
        }
        Method::Replace => {
            let from_child = path.get(&child_data).ok_or_else(missing)?;
            set_or_replace_root(&mut rendered, &path, from_child.clone()).map_err(invalid_path)?;
        }
        Method::Merge => {
            let from_child = path.get(&child_data).ok_or_else(missing)?;
            let merged = match path.get(&rendered) {
                Some(from_parent) if from_parent.is_object() && from_child.is_object() => {
                    let mut merged = from_parent.clone();
                    deep_merge(&mut merged, from_child);
                    merged
                }
                _ => from_child.clone(),
            };
            set_or_replace_root(&mut rendered, &path, merged).map_err(invalid_path)?;
        }
    }

    Ok(rendered)
}

fn set_or_replace_root(
    target: &mut Value,
    path: &JsonPath,
    value: Value,
) -> Result<(), crate::jsonpath::PathError> {
    if path.is_root() {
        *target = value;
        return Ok(());
    }
    path.set(target, value)
}

fn object_or_empty(value: Value) -> Value {
    if value.is_null() {
        Value::Object(Map::new())
    } else {
        value
    }
}
