//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the control plane:
//! - RDF terms and quads (`Term`, `Literal`, `Quad`)
//! - Solution rows exchanged with the host engine (`Binding`)
//! - Error types (`QuarryError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module implement `Ord` so they can be kept in
//! `BTreeMap`/`BTreeSet` and iterated in a stable order.

use crate::primitives::{RDF_NS, XSD_BOOLEAN, XSD_INTEGER, XSD_STRING};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// TERMS
// =============================================================================

/// A literal value with an optional datatype IRI or language tag.
///
/// A plain literal (`datatype == None`, `language == None`) is treated as
/// `xsd:string` when compared by the session functions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// An absolute IRI (stored without angle brackets).
    Iri(String),
    /// A blank node label (stored without the `_:` prefix).
    BlankNode(String),
    /// A literal.
    Literal(Literal),
}

impl Term {
    #[must_use]
    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Iri(iri.into())
    }

    #[must_use]
    pub fn blank(label: impl Into<String>) -> Self {
        Self::BlankNode(label.into())
    }

    /// A plain string literal.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(Literal {
            value: value.into(),
            datatype: None,
            language: None,
        })
    }

    /// A literal with an explicit datatype IRI.
    #[must_use]
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        let datatype = datatype.into();
        Self::Literal(Literal {
            value: value.into(),
            // xsd:string and the plain literal are the same term.
            datatype: (datatype != XSD_STRING).then_some(datatype),
            language: None,
        })
    }

    /// A language-tagged literal.
    #[must_use]
    pub fn lang(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Literal(Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into().to_ascii_lowercase()),
        })
    }

    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), XSD_INTEGER)
    }

    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::typed(value.to_string(), XSD_BOOLEAN)
    }

    /// The container membership property `rdf:_n`.
    #[must_use]
    pub fn membership(ordinal: u64) -> Self {
        Self::Iri(format!("{}_{}", RDF_NS, ordinal))
    }

    /// The ordinal `n` if this term is the membership property `rdf:_n`.
    #[must_use]
    pub fn membership_ordinal(&self) -> Option<u64> {
        let digits = self.as_iri()?.strip_prefix(RDF_NS)?.strip_prefix('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().filter(|n| *n > 0)
    }

    /// The IRI string, if this term is an IRI.
    #[must_use]
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// The literal, if this term is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::BlankNode(_))
    }

    /// The lexical form used when a term is read as a configuration value
    /// or as a string argument: IRI text, literal value, or blank label.
    #[must_use]
    pub fn lexical(&self) -> &str {
        match self {
            Self::Iri(iri) => iri,
            Self::BlankNode(label) => label,
            Self::Literal(lit) => &lit.value,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{}>", iri),
            Self::BlankNode(label) => write!(f, "_:{}", label),
            Self::Literal(lit) => {
                write!(f, "\"{}\"", escape_literal(&lit.value))?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{}", lang)
                } else if let Some(dt) = &lit.datatype {
                    write!(f, "^^<{}>", dt)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Escape a literal value for N-Triples output.
fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

// =============================================================================
// QUAD
// =============================================================================

/// A triple in an optional named graph. `graph == None` is the default graph.
///
/// Field order makes the derived `Ord` sort by subject first, which keeps
/// the per-subject range scans in `Graph` cheap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Option<Term>,
}

impl Quad {
    #[must_use]
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }

    /// A quad in the default graph.
    #[must_use]
    pub fn triple(subject: Term, predicate: Term, object: Term) -> Self {
        Self::new(subject, predicate, object, None)
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(g) = &self.graph {
            write!(f, " {}", g)?;
        }
        write!(f, " .")
    }
}

// =============================================================================
// BINDING (solution row)
// =============================================================================

/// One solution row: variable name (without `?`) to term.
///
/// Uses `BTreeMap` so rows compare and hash deterministically, which the
/// correlated resolver relies on when de-duplicating outer rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Binding(BTreeMap<String, Term>);

impl Binding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, var: impl Into<String>, term: Term) -> Self {
        self.0.insert(var.into(), term);
        self
    }

    pub fn insert(&mut self, var: impl Into<String>, term: Term) {
        self.0.insert(var.into(), term);
    }

    #[must_use]
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Restrict the row to the given variables. Unbound variables map to `None`,
    /// so two rows that agree on every listed variable project identically.
    #[must_use]
    pub fn project(&self, vars: &[String]) -> Vec<Option<Term>> {
        vars.iter().map(|v| self.0.get(v).cloned()).collect()
    }

    /// Join two rows. Returns `None` when a shared variable is bound to
    /// different terms.
    #[must_use]
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        let mut merged = self.clone();
        for (var, term) in &other.0 {
            match merged.0.get(var) {
                Some(existing) if existing != term => return None,
                Some(_) => {}
                None => {
                    merged.0.insert(var.clone(), term.clone());
                }
            }
        }
        Some(merged)
    }
}

impl FromIterator<(String, Term)> for Binding {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the control plane.
///
/// - No silent failures: SILENT calls convert these to empty results at the
///   call boundary only
/// - Use `Result<T, QuarryError>` for fallible operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    /// Neither a location, inline content nor an archive entry was configured.
    #[error("Missing location: configuration has no location, content or archive entry")]
    MissingLocation,

    /// No materializer accepts the declared or detected format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The requested archive entry does not exist.
    #[error("Entry not found: {entry} in {archive}")]
    EntryNotFound { archive: String, entry: String },

    /// A materializer failed while decoding its input.
    #[error("Materialization failed: {0}")]
    MaterializationFailed(String),

    /// The location could not be fetched.
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Conflicting or malformed options.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Nested reserved-scheme calls exceeded the configured depth.
    #[error("Nesting limit exceeded: depth {0}")]
    NestingLimitExceeded(usize),

    /// A session function was called with unusable arguments.
    #[error("Invalid function call: {0}")]
    InvalidFunctionCall(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for QuarryError {
    fn from(e: std::io::Error) -> Self {
        // Readers that wrap a materialization error hand it back unchanged.
        if let Some(inner) = e.get_ref().and_then(|inner| inner.downcast_ref::<QuarryError>()) {
            return inner.clone();
        }
        Self::IoError(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsd_string_is_plain_literal() {
        assert_eq!(Term::typed("a", XSD_STRING), Term::literal("a"));
    }

    #[test]
    fn membership_term() {
        assert_eq!(
            Term::membership(3),
            Term::iri("http://www.w3.org/1999/02/22-rdf-syntax-ns#_3")
        );
    }

    #[test]
    fn membership_ordinal_parsing() {
        assert_eq!(Term::membership(12).membership_ordinal(), Some(12));
        assert_eq!(Term::iri(format!("{}_0", RDF_NS)).membership_ordinal(), None);
        assert_eq!(Term::iri(format!("{}_x", RDF_NS)).membership_ordinal(), None);
        assert_eq!(Term::iri(format!("{}type", RDF_NS)).membership_ordinal(), None);
        assert_eq!(Term::literal("_1").membership_ordinal(), None);
    }

    #[test]
    fn display_escapes_literals() {
        let quad = Quad::triple(
            Term::blank("b0"),
            Term::iri("http://example.org/p"),
            Term::literal("say \"hi\"\n"),
        );
        assert_eq!(
            quad.to_string(),
            "_:b0 <http://example.org/p> \"say \\\"hi\\\"\\n\" ."
        );
    }

    #[test]
    fn display_named_graph() {
        let quad = Quad::new(
            Term::iri("s"),
            Term::iri("p"),
            Term::integer(4),
            Some(Term::iri("g")),
        );
        assert_eq!(
            quad.to_string(),
            "<s> <p> \"4\"^^<http://www.w3.org/2001/XMLSchema#integer> <g> ."
        );
    }

    #[test]
    fn merge_compatible_rows() {
        let a = Binding::new().with("x", Term::literal("1"));
        let b = Binding::new()
            .with("x", Term::literal("1"))
            .with("y", Term::literal("2"));
        let merged = a.merge(&b).expect("compatible");
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_conflicting_rows() {
        let a = Binding::new().with("x", Term::literal("1"));
        let b = Binding::new().with("x", Term::literal("2"));
        assert!(a.merge(&b).is_none());
    }

    #[test]
    fn project_keeps_unbound_slots() {
        let row = Binding::new().with("x", Term::literal("1"));
        let projected = row.project(&["x".to_string(), "y".to_string()]);
        assert_eq!(projected, vec![Some(Term::literal("1")), None]);
    }

    #[test]
    fn io_errors_unwrap_wrapped_materialization_errors() {
        let wrapped = std::io::Error::other(QuarryError::MaterializationFailed("crc".into()));
        assert_eq!(
            QuarryError::from(wrapped),
            QuarryError::MaterializationFailed("crc".into())
        );
        let plain = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(QuarryError::from(plain), QuarryError::IoError(_)));
    }
}
