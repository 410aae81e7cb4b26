//! render entrypoints
//!
//! [Engine::render] runs the whole pipeline for one revision:
//!
//! 1. look up the render cache
//! 2. pre-validate the input ([crate::validation::pre])
//! 3. read the layer order and register DataSchemas
//! 4. find parents ([crate::layering]) and check replacements ([crate::replacement])
//! 5. build the substitution source map and the dependency graph ([crate::dag])
//! 6. in dependency order: layer each document onto its parent, then run its substitutions
//! 7. post-validate the concrete output ([crate::validation::post]) and cache it
//!
//! The input slice is never modified. All work happens on copies.
use crate::cache::{RenderCache, Rendered, RevisionId};
use crate::config::{EngineConfig, RenderConfig};
use crate::dag::DependencyGraph;
use crate::document::{Document, DocumentMap, Meta};
use crate::error::RenderError;
use crate::layering::{self, LayerOrder, Parents};
use crate::replacement::Replacements;
use crate::secrets::SecretResolver;
use crate::substitution::{SourceMap, SubstitutionEngine};
use crate::validation::{post, pre, DataSchemaProvider, DocumentValidator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline
///
/// Clones observe the same flag. Observed while resolving secrets and during post-validation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            tracing::warn!("render cancelled");
            return Err(RenderError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Skip substitutions whose source (or source data) is missing instead of failing
    pub permissive_missing_sources: bool,
    pub post_validate: bool,
    pub use_cache: bool,
    /// Emit control documents (LayeringPolicy, DataSchema, ...) with the rendered output
    pub include_control: bool,
    pub cancellation: Cancellation,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            permissive_missing_sources: config.permissive_missing_sources,
            post_validate: config.post_validate,
            use_cache: true,
            include_control: config.include_control,
            cancellation: Cancellation::default(),
        }
    }
}

/// Everything known about a revision before the first document is rendered
struct Plan {
    documents: DocumentMap,
    order: Vec<Meta>,
    parents: Parents,
    replacements: Replacements,
    sources: SourceMap,
    validator: DocumentValidator,
}

pub struct Engine {
    cache: RenderCache,
    schema_provider: Option<Arc<dyn DataSchemaProvider>>,
    defaults: RenderConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: RenderCache::new(config.cache.enabled, config.cache.ttl()),
            schema_provider: None,
            defaults: config.render.clone(),
        }
    }

    /// Additional DataSchemas, listed once per render
    pub fn with_schema_provider(mut self, provider: Arc<dyn DataSchemaProvider>) -> Self {
        self.schema_provider = Some(provider);
        self
    }

    /// Options as configured, with a fresh cancellation
    pub fn default_options(&self) -> RenderOptions {
        RenderOptions::from(&self.defaults)
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Render a revision
    ///
    /// Returns the concrete, non-replaced documents in render order. Results are cached per `revision_id` unless
    /// `options.use_cache` is off. Nothing is cached when the render fails.
    pub fn render(
        &self,
        revision_id: RevisionId,
        documents: &[Document],
        secrets: &dyn SecretResolver,
        options: &RenderOptions,
    ) -> Result<Rendered, RenderError> {
        let span = tracing::info_span!("render", revision_id);
        let _enter = span.enter();

        let render = || {
            self.render_uncached(revision_id, documents, secrets, options)
                .map(Arc::new)
        };

        if options.use_cache {
            self.cache.get_or_try_insert_with(revision_id, render)
        } else {
            render()
        }
    }

    fn render_uncached(
        &self,
        revision_id: RevisionId,
        documents: &[Document],
        secrets: &dyn SecretResolver,
        options: &RenderOptions,
    ) -> Result<Vec<Document>, RenderError> {
        tracing::info!(count = documents.len(), "rendering");

        let Plan {
            mut documents,
            order,
            parents,
            replacements,
            sources,
            validator,
        } = self.plan(documents)?;

        let mut substitutions = SubstitutionEngine::new(
            sources,
            secrets,
            options.permissive_missing_sources,
            &options.cancellation,
        );

        for meta in &order {
            if documents[meta].is_control() {
                continue;
            }

            if let Some(parent) = parents.get(meta) {
                tracing::debug!(document = %meta, %parent, "layering");
                let rendered = layering::layer_document(&documents[meta], &documents[parent])?;
                documents[meta].set_data(rendered);
            }

            substitutions.substitute(meta, &mut documents)?;

            // later readers of the replaced parent see the replacement's data
            if documents[meta].is_replacement() {
                if let Some(parent) = parents.get(meta) {
                    let data = documents[meta].data().clone();
                    documents[parent].set_data(data);
                }
            }
        }

        let rendered: Vec<Document> = order
            .iter()
            .filter(|meta| !replacements.is_replaced(meta))
            .filter_map(|meta| documents.swap_remove(meta))
            .filter(|document| !document.is_abstract())
            .filter(|document| options.include_control || !document.is_control())
            .collect();

        if options.post_validate {
            if let Err(err) = post::post_validate(&rendered, &validator, &options.cancellation) {
                self.cache.invalidate_one(revision_id);
                return Err(err);
            }
        }

        tracing::info!(count = rendered.len(), "rendered");
        Ok(rendered)
    }

    /// Validate, resolve parents and replacements and compute the render order
    fn plan(&self, input: &[Document]) -> Result<Plan, RenderError> {
        pre::pre_validate(input)?;

        let layer_order = LayerOrder::from_documents(input)?;
        layer_order.check_layers(input)?;

        let validator = DocumentValidator::from_documents(input, self.schema_provider.as_deref())?;

        let documents: DocumentMap = input
            .iter()
            .map(|document| (document.meta(), document.clone()))
            .collect();

        let parents = layering::discover_parents(&documents, &layer_order)?;
        for (child, parent) in &parents {
            layering::check_parent(&documents[child], &documents[parent], &layer_order)?;
        }

        let replacements = Replacements::check(&documents, &parents)?;
        let sources = SourceMap::build(&documents, &layer_order, &replacements);

        let mut graph = DependencyGraph::default();
        for (meta, document) in &documents {
            graph.add_node(meta.clone());

            if let Some(parent) = parents.get(meta) {
                // children of a replaced parent build on the replacement
                let parent = match replacements.replacement_of(parent) {
                    Some(replacement) if replacement != meta => replacement,
                    _ => parent,
                };
                graph.add_dependency(meta.clone(), parent.clone());
            }

            for substitution in document.substitutions() {
                if let Some(source) = sources.resolve(&substitution.src.key()) {
                    graph.add_dependency(meta.clone(), source.clone());
                }
            }
        }
        let order = graph.order()?;

        Ok(Plan {
            documents,
            order,
            parents,
            replacements,
            sources,
            validator,
        })
    }

    /// Render order of `documents` without rendering them
    pub fn render_order(&self, documents: &[Document]) -> Result<Vec<Meta>, RenderError> {
        self.plan(documents).map(|plan| plan.order)
    }

    /// Check rendered documents again, dropping the cache entry of `revision_id` on failure
    pub fn validate_render(
        &self,
        revision_id: RevisionId,
        rendered: &[Document],
        validator: &DocumentValidator,
    ) -> Result<(), RenderError> {
        post::post_validate(rendered, validator, &Cancellation::default()).inspect_err(|_| {
            self.cache.invalidate_one(revision_id);
        })
    }

    /// Validator for the DataSchemas in `documents` and those of the schema provider
    pub fn validator_for(&self, documents: &[Document]) -> Result<DocumentValidator, RenderError> {
        DocumentValidator::from_documents(documents, self.schema_provider.as_deref())
    }

    /// Drop one cached revision, or all of them
    pub fn invalidate_cache(&self, revision_id: Option<RevisionId>) {
        match revision_id {
            Some(revision_id) => self.cache.invalidate_one(revision_id),
            None => self.cache.invalidate_all(),
        }
    }
}
