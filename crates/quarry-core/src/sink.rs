//! # Graph Sink
//!
//! The single contract every materializer writes through.
//!
//! The sink owns the shape of the generic target model: the root resource of
//! each document, dense membership ordinals per container, the identifier
//! minting policy and literal normalization. Where the quads end up is the
//! emitter's business: a `CollectingEmitter` builds a `Graph`, the streaming
//! executor's channel emitter pushes each quad to a consumer thread.

use crate::config::Configuration;
use crate::graph::Graph;
use crate::primitives::{
    AUDIT_DEFAULT_GRAPH, AUDIT_GRAPH, AUDIT_TRIPLES, DEFAULT_DATA_NS, KEY_BLANK_NODES,
    KEY_COERCE_TYPES, KEY_NAMESPACE, KEY_NULL_STRING, KEY_ROOT, KEY_ROOT_TYPE, KEY_TRIM_STRINGS,
    MAX_QUADS_PER_MATERIALIZATION, RDF_TYPE, ROOT_TYPE, XSD_DECIMAL,
};
use crate::{Quad, QuarryError, Term};
use std::collections::BTreeMap;

// =============================================================================
// EMITTERS
// =============================================================================

/// Destination of the quads a sink produces.
pub trait QuadEmitter: Send {
    /// Accept one quad. Returns `false` if the quad was already known (only
    /// deduplicating emitters can tell), or an error to abort materialization.
    fn emit(&mut self, quad: Quad) -> Result<bool, QuarryError>;
}

/// Emitter that collects quads into an in-memory `Graph`.
#[derive(Debug, Default)]
pub struct CollectingEmitter {
    graph: Graph,
}

impl CollectingEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl QuadEmitter for CollectingEmitter {
    fn emit(&mut self, quad: Quad) -> Result<bool, QuarryError> {
        Ok(self.graph.insert(quad))
    }
}

// =============================================================================
// SINK OPTIONS
// =============================================================================

/// The configuration-driven knobs of the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOptions {
    /// Explicit root IRI; derived from the location when absent.
    pub root: Option<String>,
    /// Type each root with `quarry:root`.
    pub root_type: bool,
    /// Mint blank nodes (`true`) or deterministic IRIs (`false`).
    pub blank_nodes: bool,
    /// Leading part of every minted blank-node label.
    pub blank_prefix: String,
    /// Namespace of named edges.
    pub namespace: String,
    /// Source values equal to this string produce no quad.
    pub null_string: Option<String>,
    pub trim_strings: bool,
    pub coerce_types: bool,
    /// Abort once this many quads were emitted.
    pub max_quads: u64,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            root: None,
            root_type: true,
            blank_nodes: true,
            blank_prefix: "b".to_string(),
            namespace: DEFAULT_DATA_NS.to_string(),
            null_string: None,
            trim_strings: false,
            coerce_types: false,
            max_quads: MAX_QUADS_PER_MATERIALIZATION,
        }
    }
}

impl SinkOptions {
    /// Read the sink options out of a resolved configuration.
    ///
    /// Blank-node labels are prefixed with the first fingerprint bytes, so
    /// graphs built from different configurations never share a label.
    #[must_use]
    pub fn from_config(config: &Configuration, max_quads: u64) -> Self {
        let root = config.get(KEY_ROOT).map(str::to_string).or_else(|| {
            config
                .location()
                .map(|loc| format!("{}#", loc))
        });
        Self {
            root,
            root_type: config.flag(KEY_ROOT_TYPE, true),
            blank_nodes: config.flag(KEY_BLANK_NODES, true),
            blank_prefix: format!("b{}_", hex::encode(&config.fingerprint().as_bytes()[..4])),
            namespace: config
                .get(KEY_NAMESPACE)
                .unwrap_or(DEFAULT_DATA_NS)
                .to_string(),
            null_string: config.get(KEY_NULL_STRING).map(str::to_string),
            trim_strings: config.flag(KEY_TRIM_STRINGS, false),
            coerce_types: config.flag(KEY_COERCE_TYPES, false),
            max_quads,
        }
    }
}

// =============================================================================
// GRAPH COUNTS
// =============================================================================

/// Number of quads per produced graph (`None` is the default graph).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphCounts(BTreeMap<Option<Term>, u64>);

impl GraphCounts {
    /// Count the quads of an already collected graph.
    #[must_use]
    pub fn of(graph: &Graph) -> Self {
        let mut counts = Self::default();
        for quad in graph.iter() {
            counts.record(quad.graph.as_ref());
        }
        counts
    }

    fn record(&mut self, graph: Option<&Term>) {
        let count = self.0.entry(graph.cloned()).or_insert(0);
        *count = count.saturating_add(1);
    }

    #[must_use]
    pub fn get(&self, graph: Option<&Term>) -> u64 {
        self.0.get(&graph.cloned()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&Term>, u64)> {
        self.0.iter().map(|(g, n)| (g.as_ref(), *n))
    }

    /// One audit quad per produced graph, in the audit graph.
    #[must_use]
    pub fn audit_quads(&self) -> Vec<Quad> {
        self.iter()
            .map(|(graph, count)| {
                let subject = graph
                    .cloned()
                    .unwrap_or_else(|| Term::iri(AUDIT_DEFAULT_GRAPH));
                Quad::new(
                    subject,
                    Term::iri(AUDIT_TRIPLES),
                    Term::integer(i64::try_from(count).unwrap_or(i64::MAX)),
                    Some(Term::iri(AUDIT_GRAPH)),
                )
            })
            .collect()
    }
}

// =============================================================================
// GRAPH SINK
// =============================================================================

/// Writes the generic target model into a `QuadEmitter`.
///
/// Blank-node labels are the options' prefix followed by a per-sink counter,
/// so they are stable within one materialization and distinct across
/// materializations of different configurations.
pub struct GraphSink<'e> {
    emitter: &'e mut dyn QuadEmitter,
    options: SinkOptions,
    /// Last ordinal handed out per container.
    ordinals: BTreeMap<Term, u64>,
    roots: u64,
    next_blank: u64,
    counts: GraphCounts,
    emitted: u64,
}

impl std::fmt::Debug for GraphSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSink")
            .field("options", &self.options)
            .field("roots", &self.roots)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

impl<'e> GraphSink<'e> {
    #[must_use]
    pub fn new(emitter: &'e mut dyn QuadEmitter, options: SinkOptions) -> Self {
        Self {
            emitter,
            options,
            ordinals: BTreeMap::new(),
            roots: 0,
            next_blank: 0,
            counts: GraphCounts::default(),
            emitted: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> &SinkOptions {
        &self.options
    }

    /// Per-graph counts of the quads accepted so far.
    #[must_use]
    pub fn counts(&self) -> &GraphCounts {
        &self.counts
    }

    /// Finish writing and hand back the counts.
    #[must_use]
    pub fn finish(self) -> GraphCounts {
        self.counts
    }

    /// Emit a quad. Any `None` among subject, predicate and object makes this
    /// a no-op; `graph == None` is the default graph.
    pub fn add(
        &mut self,
        graph: Option<&Term>,
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
    ) -> Result<(), QuarryError> {
        let (Some(subject), Some(predicate), Some(object)) = (subject, predicate, object) else {
            return Ok(());
        };
        if self.emitted >= self.options.max_quads {
            return Err(QuarryError::MaterializationFailed(format!(
                "quad limit of {} exceeded",
                self.options.max_quads
            )));
        }
        let quad = Quad::new(subject, predicate, object, graph.cloned());
        if self.emitter.emit(quad)? {
            self.emitted = self.emitted.saturating_add(1);
            self.counts.record(graph);
        }
        Ok(())
    }

    /// Emit a triple into the default graph.
    pub fn triple(&mut self, subject: Term, predicate: Term, object: Term) -> Result<(), QuarryError> {
        self.add(None, Some(subject), Some(predicate), Some(object))
    }

    /// Start a new top-level document and return its root resource.
    pub fn add_root(&mut self) -> Result<Term, QuarryError> {
        self.roots = self.roots.saturating_add(1);
        let root = match (&self.options.root, self.options.blank_nodes) {
            (Some(base), _) if self.roots == 1 => Term::iri(base.clone()),
            (Some(base), _) => Term::iri(format!("{}{}", base, self.roots)),
            (None, true) => self.fresh_blank(),
            (None, false) => Term::iri(format!("{}root{}", self.options.namespace, self.roots)),
        };
        if self.options.root_type {
            self.triple(root.clone(), Term::iri(RDF_TYPE), Term::iri(ROOT_TYPE))?;
        }
        Ok(root)
    }

    /// Hand out the next membership ordinal of `parent` (1-based, dense).
    pub fn next_membership_ordinal(&mut self, parent: &Term) -> u64 {
        let slot = self.ordinals.entry(parent.clone()).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    /// Append `value` as the next member of `parent`. Returns its ordinal.
    ///
    /// A `None` value consumes no ordinal, so ordinals stay dense over
    /// the members that were actually emitted.
    pub fn add_member(&mut self, parent: &Term, value: Option<Term>) -> Result<Option<u64>, QuarryError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let ordinal = self.next_membership_ordinal(parent);
        self.triple(parent.clone(), Term::membership(ordinal), value)?;
        Ok(Some(ordinal))
    }

    /// Attach a named edge derived from a source field name.
    pub fn add_field(&mut self, parent: &Term, field: &str, value: Option<Term>) -> Result<(), QuarryError> {
        let predicate = self.field_predicate(field);
        self.add(None, Some(parent.clone()), Some(predicate), value)
    }

    /// The predicate for a source field name under the configured namespace.
    #[must_use]
    pub fn field_predicate(&self, field: &str) -> Term {
        let local: String = field
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Term::iri(format!("{}{}", self.options.namespace, local))
    }

    /// Mint the resource for a nested structure under `parent` at `slot`.
    ///
    /// With `blank-nodes=false` the IRI is derived from the parent IRI and the
    /// slot, so the same source yields the same identifiers.
    pub fn mint_child(&mut self, parent: &Term, slot: &str) -> Term {
        if self.options.blank_nodes {
            return self.fresh_blank();
        }
        match parent {
            Term::Iri(base) if base.ends_with('#') || base.ends_with('/') => {
                Term::iri(format!("{}{}", base, slot))
            }
            Term::Iri(base) => Term::iri(format!("{}/{}", base, slot)),
            _ => self.fresh_blank(),
        }
    }

    /// Normalize a raw source value into a literal.
    ///
    /// Trims when `trim-strings` is on, drops values equal to `null-string`,
    /// and with `coerce-types` turns integers, decimals and booleans into
    /// typed literals.
    #[must_use]
    pub fn literal(&self, raw: &str) -> Option<Term> {
        let value = if self.options.trim_strings {
            raw.trim()
        } else {
            raw
        };
        if self.options.null_string.as_deref() == Some(value) {
            return None;
        }
        if !self.options.coerce_types {
            return Some(Term::literal(value));
        }
        if let Ok(n) = value.parse::<i64>() {
            return Some(Term::integer(n));
        }
        if value.contains('.') && value.parse::<f64>().is_ok_and(f64::is_finite) {
            return Some(Term::typed(value, XSD_DECIMAL));
        }
        match value {
            "true" => Some(Term::boolean(true)),
            "false" => Some(Term::boolean(false)),
            _ => Some(Term::literal(value)),
        }
    }

    /// A literal with an explicit datatype, bypassing coercion.
    #[must_use]
    pub fn typed(&self, value: &str, datatype: &str) -> Term {
        Term::typed(value, datatype)
    }

    fn fresh_blank(&mut self) -> Term {
        let label = format!("{}{}", self.options.blank_prefix, self.next_blank);
        self.next_blank = self.next_blank.saturating_add(1);
        Term::blank(label)
    }
}

// =============================================================================
// TESTS
// =============================================================================
