//! # Graph
//!
//! The in-memory quad set every collecting materialization ends up in.
//!
//! All data structures use `BTreeMap`/`BTreeSet` so iteration order is
//! deterministic: two graphs holding the same quads iterate identically.

use crate::{Quad, Term};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// GRAPH SELECTOR
// =============================================================================

/// Which graph(s) a pattern lookup reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSelector<'a> {
    /// Only the default graph.
    Default,
    /// Exactly this named graph.
    Named(&'a Term),
    /// Any named graph (not the default graph).
    AnyNamed,
}

impl GraphSelector<'_> {
    fn accepts(&self, graph: Option<&Term>) -> bool {
        match (self, graph) {
            (Self::Default, None) => true,
            (Self::Named(wanted), Some(g)) => *wanted == g,
            (Self::AnyNamed, Some(_)) => true,
            _ => false,
        }
    }
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// The main quad store.
///
/// Quads are grouped by subject; a reverse object index serves lookups whose
/// subject is unbound but whose object is known (membership navigation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    /// Subject -> quads with that subject.
    subjects: BTreeMap<Term, BTreeSet<Quad>>,

    /// Object -> subjects that point at it.
    objects: BTreeMap<Term, BTreeSet<Term>>,

    /// Number of distinct quads.
    len: usize,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quad. Returns `false` if it was already present.
    pub fn insert(&mut self, quad: Quad) -> bool {
        let subject = quad.subject.clone();
        let object = quad.object.clone();
        let inserted = self.subjects.entry(subject.clone()).or_default().insert(quad);
        if inserted {
            self.objects.entry(object).or_default().insert(subject);
            self.len = self.len.saturating_add(1);
        }
        inserted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contains(&self, quad: &Quad) -> bool {
        self.subjects
            .get(&quad.subject)
            .is_some_and(|quads| quads.contains(quad))
    }

    /// All quads in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.subjects.values().flat_map(BTreeSet::iter)
    }

    /// Names of the named graphs present, in order.
    #[must_use]
    pub fn graph_names(&self) -> BTreeSet<&Term> {
        self.iter().filter_map(|q| q.graph.as_ref()).collect()
    }

    /// Quads matching the bound components in the selected graph(s).
    pub fn matching<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
        graph: GraphSelector<'a>,
    ) -> Box<dyn Iterator<Item = &'a Quad> + 'a> {
        let filter = move |q: &&Quad| {
            predicate.is_none_or(|p| &q.predicate == p)
                && object.is_none_or(|o| &q.object == o)
                && graph.accepts(q.graph.as_ref())
        };

        if let Some(s) = subject {
            return Box::new(self.subjects.get(s).into_iter().flatten().filter(filter));
        }
        if let Some(o) = object {
            let subjects = self.objects.get(o).into_iter().flatten();
            return Box::new(
                subjects
                    .filter_map(|s| self.subjects.get(s))
                    .flatten()
                    .filter(filter),
            );
        }
        Box::new(self.iter().filter(filter))
    }

    /// Render as N-Quads, one quad per line, in deterministic order.
    #[must_use]
    pub fn to_nquads(&self) -> String {
        let mut out = String::new();
        for quad in self.iter() {
            out.push_str(&quad.to_string());
            out.push('\n');
        }
        out
    }

    // =========================================================================
    // ISOMORPHISM
    // =========================================================================

    /// Compare two graphs up to blank-node renaming.
    ///
    /// Blank nodes are labelled by iterative colour refinement over their
    /// neighbourhood (BLAKE3 of the sorted incident quads), then the relabelled
    /// quad sets are compared. Exact for the tree-shaped graphs materializers
    /// produce; graphs with indistinguishable blank nodes compare by count.
    #[must_use]
    pub fn is_isomorphic(&self, other: &Graph) -> bool {
        if self.len != other.len {
            return false;
        }
        self.canonical_quads() == other.canonical_quads()
    }

    /// The quads with every blank node replaced by its refined colour.
    fn canonical_quads(&self) -> Vec<String> {
        let colours = self.blank_colours();
        let render = |t: &Term| match t {
            Term::BlankNode(label) => colours
                .get(label.as_str())
                .map(|c| format!("_:{}", c))
                .unwrap_or_else(|| t.to_string()),
            _ => t.to_string(),
        };

        let mut quads: Vec<String> = self
            .iter()
            .map(|q| {
                format!(
                    "{} {} {} {}",
                    render(&q.subject),
                    render(&q.predicate),
                    render(&q.object),
                    q.graph.as_ref().map(|g| render(g)).unwrap_or_default()
                )
            })
            .collect();
        quads.sort();
        quads
    }

    fn blank_colours(&self) -> BTreeMap<&str, String> {
        let mut colours: BTreeMap<&str, String> = BTreeMap::new();
        for quad in self.iter() {
            for term in [&quad.subject, &quad.object] {
                if let Term::BlankNode(label) = term {
                    colours.insert(label.as_str(), String::new());
                }
            }
        }

        let rounds = colours.len().clamp(1, 32);
        for _ in 0..rounds {
            let colour_of = |t: &Term, colours: &BTreeMap<&str, String>| match t {
                Term::BlankNode(label) => {
                    format!("_:{}", colours.get(label.as_str()).cloned().unwrap_or_default())
                }
                _ => t.to_string(),
            };

            let mut signatures: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for quad in self.iter() {
                let g = quad
                    .graph
                    .as_ref()
                    .map(|g| colour_of(g, &colours))
                    .unwrap_or_default();
                if let Term::BlankNode(label) = &quad.subject {
                    signatures.entry(label.as_str()).or_default().push(format!(
                        "s {} {} {}",
                        quad.predicate,
                        colour_of(&quad.object, &colours),
                        g
                    ));
                }
                if let Term::BlankNode(label) = &quad.object {
                    signatures.entry(label.as_str()).or_default().push(format!(
                        "o {} {} {}",
                        colour_of(&quad.subject, &colours),
                        quad.predicate,
                        g
                    ));
                }
            }

            let mut next = BTreeMap::new();
            for (label, mut signature) in signatures {
                signature.sort();
                let mut hasher = blake3::Hasher::new();
                for line in &signature {
                    hasher.update(line.as_bytes());
                    hasher.update(b"\n");
                }
                next.insert(label, hasher.finalize().to_hex().as_str()[..16].to_string());
            }

            if next == colours {
                break;
            }
            colours = next;
        }
        colours
    }
}

impl Extend<Quad> for Graph {
    fn extend<I: IntoIterator<Item = Quad>>(&mut self, iter: I) {
        for quad in iter {
            self.insert(quad);
        }
    }
}

impl FromIterator<Quad> for Graph {
    fn from_iter<I: IntoIterator<Item = Quad>>(iter: I) -> Self {
        let mut graph = Graph::new();
        graph.extend(iter);
        graph
    }
}

// =============================================================================
// TESTS
// =============================================================================
