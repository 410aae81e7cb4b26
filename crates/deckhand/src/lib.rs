//! # deckhand - layered document rendering
//!
//! For CLI usage see `deckhand --help`
//!
//! ## Introduction for developers
//!
//! Read this to understand how `deckhand` renders documents.
//!
//! ### Documents
//!
//! Input is a list of YAML documents, each of them a mapping with `schema`, `metadata` and `data`:
//!
//! ```yaml
//! schema: armada/Chart/v1           # namespace/Kind/version
//! metadata:
//!   schema: metadata/Document/v1    # or metadata/Control/v1
//!   name: keystone
//!   labels: {component: keystone}
//!   layeringDefinition:
//!     layer: site
//!     abstract: false
//! data: {}
//! ```
//!
//! A document is identified by `(schema, layer, name)` ([document::Meta]). Substitutions name their source by
//! `(schema, name)` only ([document::SubstitutionKey]).
//!
//! Control documents configure the rendering itself and are not rendered:
//! - `deckhand/LayeringPolicy/v1`: the order of layers, most abstract first. Exactly one is required.
//! - `deckhand/DataSchema/v1`: a JSON schema for the `data` of the kind named by `metadata.name`
//! - `deckhand/ValidationPolicy/v1`: carried along, not interpreted
//!
//! ### Loading
//!
//! [documents::DocumentSet] reads YAML streams from files and directories and remembers which file each document
//! came from.
//!
//! ### Layering
//!
//! A document in a later layer selects its parent with `parentSelector`, a subset of the parent's labels. Its data
//! is computed by applying its `actions` (`merge`, `replace`, `delete` at a path) to a copy of the parent's rendered
//! data. See [layering].
//!
//! A child marked `replacement: true` with the same `schema` and `name` as its parent takes the parent's place: the
//! parent is dropped from the output and everything that refers to it sees the replacement. See [replacement].
//!
//! ### Substitution
//!
//! `metadata.substitutions` copy values from other documents, optionally into a regex `pattern` inside an existing
//! string. Encrypted sources hold a reference into an external secret store which is dereferenced through a
//! [secrets::SecretResolver]. See [substitution].
//!
//! ### Ordering
//!
//! Parents and substitution sources must be rendered before the documents that use them. [dag::DependencyGraph]
//! orders all documents accordingly (ties broken by identity) and reports cycles.
//!
//! ### Validation
//!
//! Before rendering the structure of every document is checked, after rendering the output is checked against the
//! built-in kind schemas and the registered DataSchemas. See [validation].
//!
//! ### Secrets
//!
//! Document data never ends up in log output or error messages without passing through [scrub::scrub_value]. The
//! CLI redacts secrets from rendered output with [scrub::redact_documents].
//!
//! ### Entrypoint
//!
//! [engine::Engine::render] ties everything together and caches results per revision ([cache::RenderCache]).
pub mod cache;
pub mod config;
pub mod dag;
pub mod document;
pub mod documents;
pub mod engine;
pub mod error;
pub mod jsonpath;
pub mod layering;
pub mod merge;
pub mod replacement;
pub mod scrub;
pub mod secrets;
pub mod substitution;
pub mod validation;
mod visit;

pub use document::{Document, Meta};
pub use engine::{Cancellation, Engine, RenderOptions};
pub use error::RenderError;
