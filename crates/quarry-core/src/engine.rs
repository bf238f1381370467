//! # Execution Integration Layer
//!
//! Intercepts `SERVICE` calls whose endpoint uses the reserved scheme and
//! answers them by materializing the addressed resource instead of calling a
//! remote endpoint.
//!
//! ## Call lifecycle
//!
//! ```text
//! recognize ──► delegated              (endpoint not reserved)
//!     │
//!     ▼
//! resolving ──► materializing ──► serving
//!     │               │
//!     └───────┬───────┘
//!             ▼
//!   SILENT ? silently-empty : failed
//! ```
//!
//! Resolution runs once per distinct outer row, projected on the variables
//! the configuration reads. Nested calls inside the inner pattern run
//! laterally, one level deeper; their errors are only silenced by their own
//! SILENT flag.

use crate::cache::{MaterializationCache, Materialized, load_or_build_durable};
use crate::config::{ConfigPattern, Configuration, Fingerprint, is_reserved, resolve};
use crate::functions::SessionFunctions;
use crate::graph::Graph;
use crate::materializer::Source;
use crate::primitives::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_SECS, KEY_AUDIT, KEY_ONDISK, KEY_ONDISK_REUSE,
    KEY_SLICE, MAX_NESTING_DEPTH, MAX_QUADS_PER_MATERIALIZATION, STREAM_BUFFER,
};
use crate::query::{BgpEvaluator, PatternElement, PatternEvaluator, ServiceCall, TriplePattern};
use crate::registry::MaterializerRegistry;
use crate::sink::{CollectingEmitter, GraphCounts, GraphSink, SinkOptions};
use crate::stream::{QuadStream, materialize_lazily};
use crate::{Binding, QuarryError, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// SETTINGS
// =============================================================================

/// Host-tunable limits of the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    pub max_nesting_depth: usize,
    pub max_quads_per_materialization: u64,
    pub stream_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_nesting_depth: MAX_NESTING_DEPTH,
            max_quads_per_materialization: MAX_QUADS_PER_MATERIALIZATION,
            stream_buffer: STREAM_BUFFER,
        }
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Registry, cache and settings shared by every execution.
#[derive(Debug)]
pub struct EngineContext {
    registry: MaterializerRegistry,
    cache: MaterializationCache,
    settings: EngineSettings,
}

impl EngineContext {
    /// A context with the built-in materializers.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_registry(settings, MaterializerRegistry::with_defaults())
    }

    #[must_use]
    pub fn with_registry(settings: EngineSettings, registry: MaterializerRegistry) -> Self {
        let cache = MaterializationCache::new(
            settings.cache_capacity,
            Duration::from_secs(settings.cache_ttl_secs),
        );
        Self {
            registry,
            cache,
            settings,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &MaterializerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &MaterializationCache {
        &self.cache
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

// =============================================================================
// REMOTE DELEGATION
// =============================================================================

/// The host's ordinary `SERVICE` handler, used for non-reserved endpoints.
pub trait RemoteServiceHandler: Send + Sync {
    /// Solutions of `pattern` at `endpoint`, each compatible with `row`.
    fn execute(
        &self,
        endpoint: &str,
        pattern: &[PatternElement],
        row: &Binding,
    ) -> Result<Vec<Binding>, QuarryError>;
}

/// Handler for hosts without remote query support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteServices;

impl RemoteServiceHandler for NoRemoteServices {
    fn execute(
        &self,
        endpoint: &str,
        _pattern: &[PatternElement],
        _row: &Binding,
    ) -> Result<Vec<Binding>, QuarryError> {
        Err(QuarryError::FetchFailed(format!(
            "no remote service handler for {}",
            endpoint
        )))
    }
}

// =============================================================================
// CALL STATE (logging only)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Delegated,
    Resolving,
    Materializing,
    Serving,
    SilentlyEmpty,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delegated => "delegated",
            Self::Resolving => "resolving",
            Self::Materializing => "materializing",
            Self::Serving => "serving",
            Self::SilentlyEmpty => "silently-empty",
            Self::Failed => "failed",
        })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Entry point for hosts: owns the shared context and the collaborators.
pub struct Engine {
    context: Arc<EngineContext>,
    evaluator: Arc<dyn PatternEvaluator>,
    remote: Arc<dyn RemoteServiceHandler>,
    executions: AtomicU64,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("context", &self.context)
            .field("executions", &self.executions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with the default evaluator and no remote delegation.
    #[must_use]
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            evaluator: Arc::new(BgpEvaluator),
            remote: Arc::new(NoRemoteServices),
            executions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PatternEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteServiceHandler>) -> Self {
        self.remote = remote;
        self
    }

    #[must_use]
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Start a top-level query execution. Session counters start fresh.
    #[must_use]
    pub fn begin(&self) -> Execution<'_> {
        let id = self.executions.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        tracing::debug!(execution = id, "execution started");
        Execution {
            engine: self,
            functions: SessionFunctions::new(),
            id,
        }
    }

    /// Resolve a bare locator (no in-pattern configuration).
    pub fn configuration(&self, locator: &str) -> Result<Configuration, QuarryError> {
        resolve(locator, &ConfigPattern::default(), None)
    }

    /// Fetch-or-build the collected materialization of a configuration.
    pub fn materialize(&self, config: &Configuration) -> Result<Arc<Materialized>, QuarryError> {
        let fingerprint = config.fingerprint();
        self.context
            .cache
            .get_or_build(fingerprint, || self.build(config, fingerprint))
    }

    /// Open a single-pass stream over a configuration. Never cached.
    pub fn stream(&self, config: &Configuration) -> Result<QuadStream, QuarryError> {
        let mut source = Source::open(config)?;
        let materializer = self.context.registry.resolve_for(config, source.peek()?)?;
        tracing::info!(
            materializer = materializer.name(),
            fingerprint = %config.fingerprint(),
            "streaming"
        );
        materialize_lazily(
            config.clone(),
            materializer,
            source,
            self.sink_options(config),
            self.context.settings.stream_buffer,
        )
    }

    fn sink_options(&self, config: &Configuration) -> SinkOptions {
        SinkOptions::from_config(config, self.context.settings.max_quads_per_materialization)
    }

    fn build(&self, config: &Configuration, fingerprint: Fingerprint) -> Result<Materialized, QuarryError> {
        match config.get(KEY_ONDISK) {
            Some(dir) => load_or_build_durable(
                Path::new(dir),
                config.flag(KEY_ONDISK_REUSE, false),
                fingerprint,
                &config.to_locator(),
                || self.collect(config),
            ),
            None => {
                let (graph, counts) = self.collect(config)?;
                Ok(Materialized::new(fingerprint, graph, counts))
            }
        }
    }

    /// Run the materializer into a fresh graph; the counts are the sink's,
    /// taken while the quads were emitted.
    fn collect(&self, config: &Configuration) -> Result<(Graph, GraphCounts), QuarryError> {
        let mut source = Source::open(config)?;
        let materializer = self.context.registry.resolve_for(config, source.peek()?)?;
        tracing::info!(
            materializer = materializer.name(),
            source = source.name(),
            fingerprint = %config.fingerprint(),
            "materializing"
        );

        let mut emitter = CollectingEmitter::new();
        let counts = {
            let mut sink = GraphSink::new(&mut emitter, self.sink_options(config));
            materializer.triplify(&mut source, config, &mut sink)?;
            sink.finish()
        };
        Ok((emitter.into_graph(), counts))
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

/// What a resolved call is served from.
enum Served {
    /// A collected graph, plus its audited copy when `audit=true`.
    Graph(Arc<Materialized>, Option<Graph>),
    Stream(Configuration),
}

/// One top-level query execution.
///
/// Owns the session function state; counters restart with every execution.
pub struct Execution<'e> {
    engine: &'e Engine,
    functions: SessionFunctions,
    id: u64,
}

impl fmt::Debug for Execution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Execution<'_> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn functions(&self) -> &SessionFunctions {
        &self.functions
    }

    /// Invoke a session function by IRI or local name.
    pub fn call_function(&self, function: &str, args: &[Term]) -> Result<Term, QuarryError> {
        self.functions.call(function, args)
    }

    /// Evaluate a top-level `SERVICE` call against the outer rows.
    ///
    /// Every returned row extends one of `outer`.
    pub fn evaluate_service(
        &self,
        call: &ServiceCall,
        outer: &[Binding],
    ) -> Result<Vec<Binding>, QuarryError> {
        self.service_at(call, outer, 1)
    }

    fn service_at(
        &self,
        call: &ServiceCall,
        outer: &[Binding],
        depth: usize,
    ) -> Result<Vec<Binding>, QuarryError> {
        let max = self.engine.context.settings.max_nesting_depth;
        if depth > max {
            self.fail(call, depth, &QuarryError::NestingLimitExceeded(depth))?;
            return Ok(Vec::new());
        }

        let config_pattern = ConfigPattern::split(call.triples());
        let config_vars = config_pattern.variables();
        // (endpoint, projected row) -> resolved and fetched source
        let mut resolved: BTreeMap<(String, Vec<Option<Term>>), Result<Arc<Served>, QuarryError>> =
            BTreeMap::new();

        let mut results = Vec::new();
        for row in outer {
            let endpoint = match self.endpoint_of(call, row) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    self.fail(call, depth, &e)?;
                    continue;
                }
            };

            if !is_reserved(&endpoint) {
                self.log_state(CallState::Delegated, &endpoint, depth);
                match self.engine.remote.execute(&endpoint, &call.pattern, row) {
                    Ok(rows) => results.extend(rows.iter().filter_map(|r| row.merge(r))),
                    Err(e) => self.fail(call, depth, &e)?,
                }
                continue;
            }

            let key = (endpoint.clone(), row.project(&config_vars));
            let served = resolved
                .entry(key)
                .or_insert_with(|| self.resolve_and_fetch(&endpoint, &config_pattern, row, depth))
                .clone();
            let served = match served {
                Ok(served) => served,
                Err(e) => {
                    self.fail(call, depth, &e)?;
                    continue;
                }
            };

            self.log_state(CallState::Serving, &endpoint, depth);
            let rows = match served.as_ref() {
                Served::Graph(materialized, audited) => self.engine.evaluator.evaluate(
                    config_pattern.data(),
                    audited.as_ref().unwrap_or(&materialized.graph),
                    row,
                ),
                Served::Stream(config) => match self.serve_stream(config, config_pattern.data(), row) {
                    Ok(rows) => rows,
                    // Stream failures surface while serving but belong to the
                    // materialization of this row.
                    Err(e) => {
                        self.fail(call, depth, &e)?;
                        continue;
                    }
                },
            };

            results.extend(self.nested(call, rows, depth)?);
        }
        Ok(results)
    }

    /// The endpoint IRI of a call under `row`.
    fn endpoint_of(&self, call: &ServiceCall, row: &Binding) -> Result<String, QuarryError> {
        match call.endpoint.resolve(row) {
            Some(Term::Iri(iri)) => Ok(iri.clone()),
            Some(other) => Err(QuarryError::InvalidConfiguration(format!(
                "service endpoint must be an IRI, got {}",
                other
            ))),
            None => Err(QuarryError::InvalidConfiguration(
                "service endpoint variable is unbound".into(),
            )),
        }
    }

    fn resolve_and_fetch(
        &self,
        endpoint: &str,
        pattern: &ConfigPattern,
        row: &Binding,
        depth: usize,
    ) -> Result<Arc<Served>, QuarryError> {
        self.log_state(CallState::Resolving, endpoint, depth);
        let config = resolve(endpoint, pattern, Some(row))?;

        self.log_state(CallState::Materializing, endpoint, depth);
        if config.flag(KEY_SLICE, false) {
            return Ok(Arc::new(Served::Stream(config)));
        }
        let materialized = self.engine.materialize(&config)?;
        let audited = config.flag(KEY_AUDIT, false).then(|| {
            let mut graph = materialized.graph.clone();
            graph.extend(materialized.counts.audit_quads());
            graph
        });
        Ok(Arc::new(Served::Graph(materialized, audited)))
    }

    /// Evaluate slice by slice; audit quads form one extra slice at the end.
    fn serve_stream(
        &self,
        config: &Configuration,
        patterns: &[TriplePattern],
        row: &Binding,
    ) -> Result<Vec<Binding>, QuarryError> {
        let mut slices = self.engine.stream(config)?.slices();
        let mut rows = Vec::new();
        for slice in slices.by_ref() {
            let graph: Graph = slice?.into_iter().collect();
            rows.extend(self.engine.evaluator.evaluate(patterns, &graph, row));
        }
        if config.flag(KEY_AUDIT, false) {
            let audit: Graph = slices
                .counts()
                .map(GraphCounts::audit_quads)
                .unwrap_or_default()
                .into_iter()
                .collect();
            rows.extend(self.engine.evaluator.evaluate(patterns, &audit, row));
        }
        Ok(rows)
    }

    /// Run the nested calls of the inner pattern laterally over `rows`.
    fn nested(
        &self,
        call: &ServiceCall,
        mut rows: Vec<Binding>,
        depth: usize,
    ) -> Result<Vec<Binding>, QuarryError> {
        for element in &call.pattern {
            if let PatternElement::Service(inner) = element {
                if rows.is_empty() {
                    break;
                }
                rows = self.service_at(inner, &rows, depth + 1)?;
            }
        }
        Ok(rows)
    }

    /// SILENT turns the error into zero rows for the current outer row.
    fn fail(&self, call: &ServiceCall, depth: usize, error: &QuarryError) -> Result<(), QuarryError> {
        if call.silent {
            tracing::warn!(
                execution = self.id,
                depth,
                state = %CallState::SilentlyEmpty,
                error = %error,
                "service call failed silently"
            );
            return Ok(());
        }
        tracing::debug!(
            execution = self.id,
            depth,
            state = %CallState::Failed,
            error = %error,
            "service call failed"
        );
        Err(error.clone())
    }

    fn log_state(&self, state: CallState, endpoint: &str, depth: usize) {
        tracing::debug!(execution = self.id, depth, %state, endpoint, "service call");
    }
}

// =============================================================================
// TESTS
// =============================================================================
