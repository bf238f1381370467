//! # Session Function Runtime
//!
//! Helper functions the host's expression evaluator calls during execution,
//! addressed by IRI under `https://w3id.org/quarry/fn#`.
//!
//! All functions are pure except `serial`, whose counters belong to one
//! `SessionFunctions` value. The engine creates a fresh value for every
//! `Execution`, so counters restart at 1 for each top-level query and are
//! never persisted.

use crate::primitives::{QUARRY_FN_NS, XSD_INTEGER};
use crate::{QuarryError, Term};
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Local names of every function, for hosts that register them up front.
pub const FUNCTION_NAMES: &[&str] = &[
    "next",
    "previous",
    "forward",
    "backward",
    "cardinal",
    "is-container-membership-property",
    "entity",
    "literal",
    "bnode",
    "String.trim",
    "String.lower",
    "String.upper",
    "String.substring",
    "String.starts-with",
    "String.ends-with",
    "String.contains",
    "String.replace",
    "sha256",
    "blake3",
    "levenshtein",
    "serial",
];

// =============================================================================
// SESSION STATE
// =============================================================================

/// Function runtime scoped to one execution.
#[derive(Debug, Default)]
pub struct SessionFunctions {
    /// Argument tuple -> last value handed out by `serial`.
    counters: Mutex<BTreeMap<Vec<Term>, i64>>,
}

impl SessionFunctions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every counter.
    pub fn reset(&self) {
        self.counters.lock().clear();
    }

    /// Next value of the counter identified by `args`: 1 on the first call
    /// with a tuple, then 2, 3, and so on. Tuples are independent.
    pub fn serial(&self, args: &[Term]) -> i64 {
        let mut counters = self.counters.lock();
        let slot = counters.entry(args.to_vec()).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    /// Invoke a function by full IRI or local name.
    pub fn call(&self, function: &str, args: &[Term]) -> Result<Term, QuarryError> {
        let name = function.strip_prefix(QUARRY_FN_NS).unwrap_or(function);
        match name {
            "next" => shift(name, args, 1),
            "previous" => shift(name, args, -1),
            "forward" => {
                let k = integer_arg(name, args, 1)?;
                shift(name, &args[..1], k)
            }
            "backward" => {
                let k = integer_arg(name, args, 1)?;
                shift(name, &args[..1], k.saturating_neg())
            }
            "cardinal" => {
                let n = ordinal_arg(name, args)?;
                Ok(Term::integer(i64::try_from(n).unwrap_or(i64::MAX)))
            }
            "is-container-membership-property" => {
                arity(name, args, 1)?;
                Ok(Term::boolean(args[0].membership_ordinal().is_some()))
            }
            "entity" => entity(args),
            "literal" => literal(args),
            "bnode" => bnode(args),
            "String.trim" => map_string(name, args, |s| s.trim().to_string()),
            "String.lower" => map_string(name, args, str::to_lowercase),
            "String.upper" => map_string(name, args, str::to_uppercase),
            "String.substring" => substring(args),
            "String.starts-with" => test_strings(name, args, |a, b| a.starts_with(b)),
            "String.ends-with" => test_strings(name, args, |a, b| a.ends_with(b)),
            "String.contains" => test_strings(name, args, |a, b| a.contains(b)),
            "String.replace" => replace(args),
            "sha256" => {
                arity(name, args, 1)?;
                Ok(Term::literal(hex::encode(Sha256::digest(
                    args[0].lexical().as_bytes(),
                ))))
            }
            "blake3" => {
                arity(name, args, 1)?;
                Ok(Term::literal(
                    blake3::hash(args[0].lexical().as_bytes()).to_hex().to_string(),
                ))
            }
            "levenshtein" => {
                arity(name, args, 2)?;
                let d = levenshtein(args[0].lexical(), args[1].lexical());
                Ok(Term::integer(i64::try_from(d).unwrap_or(i64::MAX)))
            }
            "serial" => Ok(Term::integer(self.serial(args))),
            other => Err(QuarryError::InvalidFunctionCall(format!(
                "unknown function '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// ARGUMENT HELPERS
// =============================================================================

fn arity(name: &str, args: &[Term], expected: usize) -> Result<(), QuarryError> {
    if args.len() != expected {
        return Err(QuarryError::InvalidFunctionCall(format!(
            "{} expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn ordinal_arg(name: &str, args: &[Term]) -> Result<u64, QuarryError> {
    arity(name, args, 1)?;
    args[0].membership_ordinal().ok_or_else(|| {
        QuarryError::InvalidFunctionCall(format!(
            "{} expects a container membership property, got {}",
            name, args[0]
        ))
    })
}

fn integer_arg(name: &str, args: &[Term], index: usize) -> Result<i64, QuarryError> {
    arity(name, args, 2)?;
    let value = &args[index];
    let numeric = value
        .as_literal()
        .filter(|l| l.datatype.as_deref().is_none_or(|d| d == XSD_INTEGER))
        .and_then(|l| l.value.trim().parse::<i64>().ok());
    numeric.ok_or_else(|| {
        QuarryError::InvalidFunctionCall(format!("{} expects an integer, got {}", name, value))
    })
}

// =============================================================================
// ORDINAL NAVIGATION
// =============================================================================

/// Move a membership property by `delta` slots.
fn shift(name: &str, args: &[Term], delta: i64) -> Result<Term, QuarryError> {
    let n = ordinal_arg(name, args)?;
    let target = i64::try_from(n)
        .ok()
        .and_then(|n| n.checked_add(delta))
        .filter(|t| *t >= 1)
        .ok_or_else(|| {
            QuarryError::InvalidFunctionCall(format!(
                "{} moves {} outside the container",
                name, args[0]
            ))
        })?;
    Ok(Term::membership(target.unsigned_abs()))
}

// =============================================================================
// TERM CONSTRUCTION
// =============================================================================

/// Concatenate the lexical forms of the arguments into an IRI.
fn entity(args: &[Term]) -> Result<Term, QuarryError> {
    if args.is_empty() {
        return Err(QuarryError::InvalidFunctionCall(
            "entity expects at least one argument".into(),
        ));
    }
    let iri: String = args.iter().map(Term::lexical).collect();
    Ok(Term::iri(iri))
}

/// `literal(value)`, `literal(value, lang)` or `literal(value, <datatype>)`.
fn literal(args: &[Term]) -> Result<Term, QuarryError> {
    match args {
        [value] => Ok(Term::literal(value.lexical())),
        [value, Term::Iri(datatype)] => Ok(Term::typed(value.lexical(), datatype.clone())),
        [value, Term::Literal(lang)] if !lang.value.is_empty() => {
            Ok(Term::lang(value.lexical(), lang.value.clone()))
        }
        _ => Err(QuarryError::InvalidFunctionCall(
            "literal expects a value and an optional language tag or datatype".into(),
        )),
    }
}

/// A blank node whose label is derived from the arguments, so equal
/// arguments give the same node within a result.
fn bnode(args: &[Term]) -> Result<Term, QuarryError> {
    if args.is_empty() {
        return Err(QuarryError::InvalidFunctionCall(
            "bnode expects at least one argument".into(),
        ));
    }
    let mut hasher = blake3::Hasher::new();
    for arg in args {
        hasher.update(arg.to_string().as_bytes());
        hasher.update(b"\0");
    }
    Ok(Term::blank(format!(
        "fn{}",
        &hasher.finalize().to_hex().as_str()[..16]
    )))
}

// =============================================================================
// STRINGS
// =============================================================================

fn map_string(name: &str, args: &[Term], f: impl Fn(&str) -> String) -> Result<Term, QuarryError> {
    arity(name, args, 1)?;
    Ok(Term::literal(f(args[0].lexical())))
}

fn test_strings(
    name: &str,
    args: &[Term],
    f: impl Fn(&str, &str) -> bool,
) -> Result<Term, QuarryError> {
    arity(name, args, 2)?;
    Ok(Term::boolean(f(args[0].lexical(), args[1].lexical())))
}

/// 1-based, character-indexed substring with optional length.
fn substring(args: &[Term]) -> Result<Term, QuarryError> {
    let name = "String.substring";
    let (text, start, len) = match args {
        [text, _] => (text, integer_arg(name, args, 1)?, None),
        [text, start, len] => {
            let pair = [start.clone(), len.clone()];
            (
                text,
                integer_arg(name, &pair, 0)?,
                Some(integer_arg(name, &pair, 1)?),
            )
        }
        _ => {
            return Err(QuarryError::InvalidFunctionCall(
                "String.substring expects 2 or 3 arguments".into(),
            ));
        }
    };
    let skip = usize::try_from(start.saturating_sub(1).max(0)).unwrap_or(usize::MAX);
    let chars = text.lexical().chars().skip(skip);
    let out: String = match len {
        Some(n) => chars
            .take(usize::try_from(n.max(0)).unwrap_or(usize::MAX))
            .collect(),
        None => chars.collect(),
    };
    Ok(Term::literal(out))
}

/// Regex replace of every match.
fn replace(args: &[Term]) -> Result<Term, QuarryError> {
    arity("String.replace", args, 3)?;
    let re = Regex::new(args[1].lexical())
        .map_err(|e| QuarryError::InvalidFunctionCall(format!("String.replace: {}", e)))?;
    Ok(Term::literal(
        re.replace_all(args[0].lexical(), args[2].lexical())
            .into_owned(),
    ))
}

// =============================================================================
// HASHES AND DISTANCE
// =============================================================================

/// Edit distance over Unicode scalar values, two-row dynamic programming.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// =============================================================================
// TESTS
// =============================================================================
