//! Plain text materializer.
//!
//! The document becomes one root. Without options the whole text is the
//! root's only member. `txt.split=<regex>` makes every non-empty segment a
//! member literal. `txt.regex=<regex>` (repeatable) makes every match a
//! member resource whose capture groups, group 0 first, are its members;
//! when both are given `txt.regex` decides.

use crate::config::Configuration;
use crate::materializer::{Materializer, Source};
use crate::primitives::{KEY_CHARSET, KEY_TXT_REGEX, KEY_TXT_SPLIT};
use crate::sink::GraphSink;
use crate::{QuarryError, Term};
use regex::Regex;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextMaterializer;

impl Materializer for TextMaterializer {
    fn name(&self) -> &str {
        "text"
    }

    fn triplify(
        &self,
        source: &mut Source,
        config: &Configuration,
        sink: &mut GraphSink<'_>,
    ) -> Result<(), QuarryError> {
        check_charset(config)?;
        let text = source.read_to_string()?;
        let root = sink.add_root()?;

        let patterns = config.get_all(KEY_TXT_REGEX);
        if !patterns.is_empty() {
            for pattern in patterns {
                let re = compile(KEY_TXT_REGEX, pattern)?;
                for captures in re.captures_iter(&text) {
                    let ordinal = sink.next_membership_ordinal(&root);
                    let item = sink.mint_child(&root, &ordinal.to_string());
                    sink.triple(root.clone(), Term::membership(ordinal), item.clone())?;
                    for group in captures.iter() {
                        let value = group.and_then(|m| sink.literal(m.as_str()));
                        sink.add_member(&item, value)?;
                    }
                }
            }
            return Ok(());
        }

        if let Some(separator) = config.get(KEY_TXT_SPLIT) {
            let re = compile(KEY_TXT_SPLIT, separator)?;
            for segment in re.split(&text).filter(|s| !s.is_empty()) {
                let value = sink.literal(segment);
                sink.add_member(&root, value)?;
            }
            return Ok(());
        }

        let value = sink.literal(&text);
        sink.add_member(&root, value)?;
        Ok(())
    }
}

fn compile(key: &str, pattern: &str) -> Result<Regex, QuarryError> {
    Regex::new(pattern).map_err(|e| QuarryError::InvalidConfiguration(format!("{}: {}", key, e)))
}

fn check_charset(config: &Configuration) -> Result<(), QuarryError> {
    match config.get(KEY_CHARSET).map(str::to_ascii_lowercase).as_deref() {
        None | Some("utf-8" | "utf8" | "us-ascii" | "ascii") => Ok(()),
        Some(other) => Err(QuarryError::InvalidConfiguration(format!(
            "unsupported charset '{}'",
            other
        ))),
    }
}
