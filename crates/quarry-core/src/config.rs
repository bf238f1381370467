//! # Configuration Resolver
//!
//! Turns a reserved-scheme locator plus the configuration triples of a call's
//! inner pattern into a normalized, order-independent `Configuration`.
//!
//! ## Sources
//!
//! - Locator suffix: `x-quarry:data.csv,csv.headers=true`. A segment without
//!   `=` is the primary location; `\,` and `\=` escape separators.
//! - In-pattern triples: `quarry:properties quarry:<key> value`, in any order,
//!   including multi-hop forms (`quarry:properties quarry:options ?o .
//!   ?o quarry:location "x"`). Values may be variables bound by the outer row.
//!
//! ## Merge rules
//!
//! - In-pattern values override locator values on key collision.
//! - Within the locator, the last write of a key wins.
//! - Within the pattern, repeating a key with the same value is harmless;
//!   two different values for a single-valued key are a conflict.
//! - `MULTI_VALUED_KEYS` accumulate a sorted set from both sources.
//!
//! Resolution is a pure function of its inputs.

use crate::primitives::{
    BOOLEAN_KEYS, CONFIG_SUBJECT, KEY_CONTENT, KEY_FROM_ARCHIVE, KEY_LOCATION, KEY_MEDIA_TYPE,
    MULTI_VALUED_KEYS, QUARRY_NS, SCHEME_PREFIX,
};
use crate::query::{PatternTerm, TriplePattern};
use crate::{Binding, QuarryError, Term};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// FINGERPRINT
// =============================================================================

/// BLAKE3 digest of a normalized configuration; the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// A normalized option set driving one materialization.
///
/// Options are kept in a `BTreeMap` of key to sorted values, so equality and
/// the fingerprint are independent of declaration order and source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Configuration {
    options: BTreeMap<String, Vec<String>>,
}

impl Configuration {
    /// Build a configuration directly from key/value pairs, applying the
    /// locator merge rules (last write wins, multi-valued keys accumulate).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, QuarryError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key.into(), value.into())?;
        }
        Ok(config)
    }

    /// Set a key, replacing single-valued keys and accumulating multi-valued ones.
    fn set(&mut self, key: String, value: String) -> Result<(), QuarryError> {
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(QuarryError::InvalidConfiguration(
                "empty option key".to_string(),
            ));
        }
        let value = normalize_value(&key, value)?;
        if is_multi_valued(&key) {
            let values = self.options.entry(key).or_default();
            if let Err(pos) = values.binary_search(&value) {
                values.insert(pos, value);
            }
        } else {
            self.options.insert(key, vec![value]);
        }
        Ok(())
    }

    /// The primary location, if any.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.get(KEY_LOCATION)
    }

    /// Inline content used instead of a location.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.get(KEY_CONTENT)
    }

    /// Declared media type.
    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.get(KEY_MEDIA_TYPE)
    }

    /// The archive the location is an entry of.
    #[must_use]
    pub fn from_archive(&self) -> Option<&str> {
        self.get(KEY_FROM_ARCHIVE)
    }

    /// First value of a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of a key (sorted for multi-valued keys).
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.options.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Boolean option with a default.
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v == "true",
            None => default,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// Options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// A copy with one key set (locator merge rules).
    pub fn with(&self, key: &str, value: &str) -> Result<Self, QuarryError> {
        let mut config = self.clone();
        config.set(key.to_string(), value.to_string())?;
        Ok(config)
    }

    /// Fail with `MissingLocation` unless a location or inline content exists.
    pub fn require_source(&self) -> Result<(), QuarryError> {
        if self.location().is_none() && self.content().is_none() {
            return Err(QuarryError::MissingLocation);
        }
        Ok(())
    }

    /// Deterministic digest of the normalized options.
    ///
    /// Every key and value is length-prefixed so that no two distinct option
    /// maps share an encoding.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.options.len() as u64).to_le_bytes());
        for (key, values) in &self.options {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(values.len() as u64).to_le_bytes());
            for value in values {
                hasher.update(&(value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }

    /// Render as a canonical locator (keys sorted, separators escaped).
    #[must_use]
    pub fn to_locator(&self) -> String {
        let mut parts = Vec::new();
        for (key, values) in &self.options {
            for value in values {
                parts.push(format!("{}={}", escape(key), escape(value)));
            }
        }
        format!("{}{}", SCHEME_PREFIX, parts.join(","))
    }
}

fn is_multi_valued(key: &str) -> bool {
    MULTI_VALUED_KEYS.contains(&key)
}

/// Validate and canonicalize a value (boolean spellings fold to lowercase).
fn normalize_value(key: &str, value: String) -> Result<String, QuarryError> {
    if BOOLEAN_KEYS.contains(&key) {
        return match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok("true".to_string()),
            "false" | "0" | "no" => Ok("false".to_string()),
            other => Err(QuarryError::InvalidConfiguration(format!(
                "option '{}' expects a boolean, got '{}'",
                key, other
            ))),
        };
    }
    Ok(value)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

// =============================================================================
// LOCATOR PARSING
// =============================================================================

/// Whether an endpoint IRI uses the reserved scheme.
#[must_use]
pub fn is_reserved(locator: &str) -> bool {
    locator.starts_with(SCHEME_PREFIX)
}

/// Split a reserved-scheme locator into ordered `(key, value)` pairs.
///
/// A segment without a key is reported as `location`. A segment whose text
/// before the first `=` is not a plain option key (for example an HTTP URL
/// with a query string) is also treated as a location.
pub fn parse_locator(locator: &str) -> Result<Vec<(String, String)>, QuarryError> {
    let body = locator.strip_prefix(SCHEME_PREFIX).ok_or_else(|| {
        QuarryError::InvalidConfiguration(format!("not a {} locator: {}", SCHEME_PREFIX, locator))
    })?;

    let mut pairs = Vec::new();
    for segment in split_unescaped(body, ',') {
        if segment.raw.trim().is_empty() {
            continue;
        }
        match segment.split_key() {
            Some((key, value)) => pairs.push((key, value)),
            None => pairs.push((KEY_LOCATION.to_string(), unescape(&segment.raw))),
        }
    }
    Ok(pairs)
}

struct Segment {
    raw: String,
}

impl Segment {
    fn split_key(&self) -> Option<(String, String)> {
        let mut escaped = false;
        for (i, c) in self.raw.char_indices() {
            match c {
                '\\' if !escaped => escaped = true,
                '=' if !escaped => {
                    let key = &self.raw[..i];
                    if !is_option_key(key) {
                        return None;
                    }
                    return Some((key.to_string(), unescape(&self.raw[i + 1..])));
                }
                _ => escaped = false,
            }
        }
        None
    }
}

fn is_option_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Split on `sep` unless preceded by a backslash. Escapes are kept in the
/// segments so the key/value split can still see them.
fn split_unescaped(s: &str, sep: char) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            segments.push(Segment {
                raw: std::mem::take(&mut current),
            });
        } else {
            current.push(c);
        }
    }
    segments.push(Segment { raw: current });
    segments
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// IN-PATTERN CONFIGURATION
// =============================================================================

/// The inner pattern of a call split into configuration and data triples.
#[derive(Debug, Clone, Default)]
pub struct ConfigPattern {
    /// `(option key, value position)` in declaration order.
    options: Vec<(String, PatternTerm)>,
    /// Triples to evaluate against the materialized data.
    data: Vec<TriplePattern>,
}

impl ConfigPattern {
    /// Separate configuration triples from data triples.
    ///
    /// A subject is a configuration subject if it is `quarry:properties` or is
    /// reached from one through a quarry-namespace predicate whose object is a
    /// variable or blank node that itself carries quarry-namespace triples.
    #[must_use]
    pub fn split<'a>(triples: impl IntoIterator<Item = &'a TriplePattern>) -> Self {
        let triples: Vec<&TriplePattern> = triples.into_iter().collect();
        let is_quarry_predicate = |t: &TriplePattern| {
            matches!(&t.predicate, PatternTerm::Term(Term::Iri(p)) if p.starts_with(QUARRY_NS))
        };

        let mut subjects: BTreeSet<PatternTerm> = BTreeSet::new();
        subjects.insert(PatternTerm::iri(CONFIG_SUBJECT));

        // Positions that carry quarry-namespace triples of their own.
        let quarry_subjects: BTreeSet<&PatternTerm> = triples
            .iter()
            .filter(|t| is_quarry_predicate(t))
            .map(|t| &t.subject)
            .collect();

        let mut links: BTreeSet<usize> = BTreeSet::new();
        loop {
            let mut grew = false;
            for (i, t) in triples.iter().enumerate() {
                if !subjects.contains(&t.subject) || !is_quarry_predicate(t) {
                    continue;
                }
                let is_link = match &t.object {
                    PatternTerm::Var(_) | PatternTerm::Term(Term::BlankNode(_)) => {
                        quarry_subjects.contains(&t.object)
                    }
                    _ => false,
                };
                if is_link && links.insert(i) {
                    subjects.insert(t.object.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let mut pattern = Self::default();
        for (i, t) in triples.iter().enumerate() {
            let is_config = subjects.contains(&t.subject) && is_quarry_predicate(t);
            if !is_config {
                pattern.data.push((*t).clone());
                continue;
            }
            if links.contains(&i) {
                continue;
            }
            if let PatternTerm::Term(Term::Iri(p)) = &t.predicate {
                let key = p.trim_start_matches(QUARRY_NS).to_string();
                pattern.options.push((key, t.object.clone()));
            }
        }
        pattern
    }

    /// Triples left for evaluation against the materialized graph.
    #[must_use]
    pub fn data(&self) -> &[TriplePattern] {
        &self.data
    }

    /// Whether any configuration triple was found.
    #[must_use]
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// Variables whose outer bindings feed configuration values.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let vars: BTreeSet<String> = self
            .options
            .iter()
            .filter_map(|(_, v)| v.as_var().map(str::to_string))
            .collect();
        vars.into_iter().collect()
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Resolve a call's configuration.
///
/// `outer` supplies values for variables in configuration triples when the
/// call is evaluated per outer row; unbound variables contribute nothing.
pub fn resolve(
    locator: &str,
    pattern: &ConfigPattern,
    outer: Option<&Binding>,
) -> Result<Configuration, QuarryError> {
    let mut config = Configuration::default();
    for (key, value) in parse_locator(locator)? {
        config.set(key, value)?;
    }

    // Collect in-pattern values per key before merging so that the order of
    // the triples cannot matter.
    let empty = Binding::new();
    let row = outer.unwrap_or(&empty);
    let mut declared: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (key, position) in &pattern.options {
        let Some(term) = position.resolve(row) else {
            continue;
        };
        if term.is_blank() {
            continue;
        }
        let value = normalize_value(key, term.lexical().to_string())?;
        declared.entry(key.clone()).or_default().insert(value);
    }

    for (key, values) in declared {
        if is_multi_valued(&key) {
            for value in values {
                config.set(key.clone(), value)?;
            }
            continue;
        }
        if values.len() > 1 {
            return Err(QuarryError::InvalidConfiguration(format!(
                "option '{}' declared with conflicting values: {}",
                key,
                values.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        if let Some(value) = values.into_iter().next() {
            config.set(key, value)?;
        }
    }

    config.require_source()?;
    Ok(config)
}

// =============================================================================
// TESTS
// =============================================================================
