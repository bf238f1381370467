//! # Query Module
//!
//! The slice of the host query algebra the control plane needs to see:
//! triple patterns, nested `SERVICE` calls, and a pattern evaluator seam.
//!
//! Parsing and full algebra evaluation belong to the host engine. The
//! `BgpEvaluator` here is the default evaluator for the inner pattern of a
//! materialized call: a basic graph pattern matched against a `Graph` and
//! seeded with the outer row.

use crate::graph::{Graph, GraphSelector};
use crate::{Binding, Quad, Term};
use std::collections::BTreeSet;

// =============================================================================
// PATTERN TYPES
// =============================================================================

/// A position in a triple pattern: a variable or a concrete term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternTerm {
    Var(String),
    Term(Term),
}

impl PatternTerm {
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    #[must_use]
    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Term(Term::iri(iri))
    }

    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Term(Term::literal(value))
    }

    /// The term this position denotes under `row`, if any.
    #[must_use]
    pub fn resolve<'a>(&'a self, row: &'a Binding) -> Option<&'a Term> {
        match self {
            Self::Term(t) => Some(t),
            Self::Var(v) => row.get(v),
        }
    }

    #[must_use]
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Self::Var(v) => Some(v),
            Self::Term(_) => None,
        }
    }
}

impl From<Term> for PatternTerm {
    fn from(term: Term) -> Self {
        Self::Term(term)
    }
}

/// A triple pattern, optionally scoped to a graph (`GRAPH ?g { ... }`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
    pub graph: Option<PatternTerm>,
}

impl TriplePattern {
    #[must_use]
    pub fn new(subject: PatternTerm, predicate: PatternTerm, object: PatternTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: None,
        }
    }

    /// Scope the pattern to a graph.
    #[must_use]
    pub fn in_graph(mut self, graph: PatternTerm) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Variables mentioned by this pattern.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [
            Some(&self.subject),
            Some(&self.predicate),
            Some(&self.object),
            self.graph.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter_map(PatternTerm::as_var)
    }

    /// Number of positions bound under the given set of bound variables.
    fn bound_positions(&self, bound: &BTreeSet<&str>) -> usize {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter(|p| p.as_var().is_none_or(|v| bound.contains(v)))
            .count()
    }
}

/// One element of a group graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternElement {
    Triple(TriplePattern),
    Service(ServiceCall),
}

/// A `SERVICE [SILENT] <endpoint> { pattern }` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    /// Endpoint IRI, or a variable bound by the outer row.
    pub endpoint: PatternTerm,
    /// Convert failures of this call into an empty result.
    pub silent: bool,
    /// The inner pattern, configuration triples included.
    pub pattern: Vec<PatternElement>,
}

impl ServiceCall {
    #[must_use]
    pub fn new(endpoint: PatternTerm, pattern: Vec<PatternElement>) -> Self {
        Self {
            endpoint,
            silent: false,
            pattern,
        }
    }

    /// Builder-style SILENT flag.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// The triple patterns of the inner pattern (nested calls excluded).
    pub fn triples(&self) -> impl Iterator<Item = &TriplePattern> {
        self.pattern.iter().filter_map(|e| match e {
            PatternElement::Triple(t) => Some(t),
            PatternElement::Service(_) => None,
        })
    }
}

// =============================================================================
// PATTERN EVALUATOR
// =============================================================================

/// Evaluates a basic graph pattern against a materialized graph.
///
/// Hosts that own a richer evaluator implement this trait and hand it to the
/// engine; the crate ships `BgpEvaluator` as the default.
pub trait PatternEvaluator: Send + Sync {
    /// All solutions of `patterns` over `graph` compatible with `seed`.
    /// Every returned row extends `seed`.
    fn evaluate(&self, patterns: &[TriplePattern], graph: &Graph, seed: &Binding) -> Vec<Binding>;
}

/// Nested-loop BGP evaluator with greedy most-bound-first ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct BgpEvaluator;

impl PatternEvaluator for BgpEvaluator {
    fn evaluate(&self, patterns: &[TriplePattern], graph: &Graph, seed: &Binding) -> Vec<Binding> {
        let mut rows = vec![seed.clone()];
        let mut remaining: Vec<&TriplePattern> = patterns.iter().collect();

        while !remaining.is_empty() && !rows.is_empty() {
            // Every row binds the same variables, so the first row decides.
            let bound: BTreeSet<&str> = rows[0].iter().map(|(v, _)| v).collect();
            let next = remaining
                .iter()
                .enumerate()
                .max_by_key(|(i, p)| (p.bound_positions(&bound), std::cmp::Reverse(*i)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let pattern = remaining.remove(next);

            rows = rows
                .iter()
                .flat_map(|row| match_pattern(pattern, graph, row))
                .collect();
        }

        rows
    }
}

/// Extend `row` with every quad of `graph` matching `pattern`.
fn match_pattern(pattern: &TriplePattern, graph: &Graph, row: &Binding) -> Vec<Binding> {
    let subject = pattern.subject.resolve(row);
    let predicate = pattern.predicate.resolve(row);
    let object = pattern.object.resolve(row);
    let selector = match &pattern.graph {
        None => GraphSelector::Default,
        Some(g) => match g.resolve(row) {
            Some(term) => GraphSelector::Named(term),
            None => GraphSelector::AnyNamed,
        },
    };

    graph
        .matching(subject, predicate, object, selector)
        .filter_map(|quad| bind_quad(pattern, quad, row))
        .collect()
}

fn bind_quad(pattern: &TriplePattern, quad: &Quad, row: &Binding) -> Option<Binding> {
    let mut extended = row.clone();
    let positions = [
        (&pattern.subject, Some(&quad.subject)),
        (&pattern.predicate, Some(&quad.predicate)),
        (&pattern.object, Some(&quad.object)),
    ];
    for (position, value) in positions
        .into_iter()
        .chain(pattern.graph.as_ref().map(|g| (g, quad.graph.as_ref())))
    {
        let (PatternTerm::Var(var), Some(value)) = (position, value) else {
            continue;
        };
        match extended.get(var) {
            // Repeated variable inside one pattern must agree.
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => extended.insert(var.clone(), value.clone()),
        }
    }
    Some(extended)
}

// =============================================================================
// TESTS
// =============================================================================
