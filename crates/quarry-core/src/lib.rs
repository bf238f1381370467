//! # quarry-core
//!
//! The materialization control plane for Quarry.
//!
//! A query names a non-graph resource through a reserved locator scheme in a
//! `SERVICE` clause (`SERVICE <x-quarry:people.csv> { ... }`). Instead of a
//! remote call, this crate resolves the call's configuration, picks a
//! materializer for the resource, writes its triples through a graph sink and
//! serves the result to the inner pattern.
//!
//! ## Layout
//!
//! - `config` → configuration resolution and fingerprints
//! - `registry`, `materializer`, `formats` → format dispatch and triplifiers
//! - `sink` → the generic target model every materializer writes
//! - `archive` → lazy access to zip members
//! - `cache`, `storage` → at-most-once builds and the durable store
//! - `stream` → single-pass materialization
//! - `engine` → interception of `SERVICE` calls
//! - `functions` → session-scoped helper functions
//!
//! ## Architectural Constraints
//!
//! - No global state: hosts construct an `EngineContext` and inject it
//! - Deterministic: BTreeMap ordering, per-sink blank-node counters
//! - No async runtime: the only thread spawned is a stream producer

// =============================================================================
// MODULES
// =============================================================================

pub mod archive;
pub mod cache;
pub mod config;
pub mod engine;
pub mod formats;
pub mod functions;
pub mod graph;
pub mod materializer;
pub mod primitives;
pub mod query;
pub mod registry;
pub mod sink;
pub mod storage;
pub mod stream;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Binding, Literal, Quad, QuarryError, Term};

// =============================================================================
// RE-EXPORTS: Control Plane
// =============================================================================

pub use archive::ArchiveResolver;
pub use cache::{MaterializationCache, Materialized};
pub use config::{ConfigPattern, Configuration, Fingerprint, is_reserved, parse_locator, resolve};
pub use engine::{Engine, EngineContext, EngineSettings, Execution, NoRemoteServices, RemoteServiceHandler};
pub use functions::SessionFunctions;
pub use graph::{Graph, GraphSelector};
pub use materializer::{Materializer, Source};
pub use query::{BgpEvaluator, PatternElement, PatternEvaluator, PatternTerm, ServiceCall, TriplePattern};
pub use registry::{FormatInfo, MaterializerRegistry};
pub use sink::{CollectingEmitter, GraphCounts, GraphSink, QuadEmitter, SinkOptions};
pub use storage::DurableStore;
pub use stream::{QuadStream, Slices, materialize_lazily};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{ArchiveListingMaterializer, TextMaterializer};
