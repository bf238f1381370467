//! # Materializer Registry
//!
//! Maps media types and file extensions to materializers.
//!
//! Resolution order for a call:
//! 1. the declared `media-type` option,
//! 2. the extension of the location (the entry path for archive members),
//! 3. the media type sniffed from the first bytes of the source.
//!
//! The tables live behind one `parking_lot::RwLock`. Resolution clones the
//! `Arc` of the chosen materializer under the read lock, so a concurrent
//! `remove` never exposes a half-updated table.

use crate::config::Configuration;
use crate::formats::{ArchiveListingMaterializer, TextMaterializer};
use crate::materializer::Materializer;
use crate::QuarryError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// SNIFFING
// =============================================================================

/// Guess a media type from the leading bytes of a source.
#[must_use]
pub fn sniff(peek: &[u8]) -> &'static str {
    if peek.starts_with(b"PK\x03\x04") || peek.starts_with(b"PK\x05\x06") {
        return "application/zip";
    }
    let text = peek.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(peek);
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    let head = &text[start..];
    let lower: Vec<u8> = head.iter().take(16).map(u8::to_ascii_lowercase).collect();

    if head.starts_with(b"{") || head.starts_with(b"[") {
        "application/json"
    } else if lower.starts_with(b"<?xml") {
        "application/xml"
    } else if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        "text/html"
    } else if is_utf8_prefix(peek) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Valid UTF-8, tolerating a multi-byte sequence cut off by the sniff window.
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

/// Lowercased extension of the last path segment of a location.
#[must_use]
pub fn extension_of(location: &str) -> Option<String> {
    let path = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Media type without parameters, lowercased.
fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
        .to_ascii_lowercase()
}

// =============================================================================
// REGISTRY
// =============================================================================

/// What the registry knows about one materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatInfo {
    pub name: String,
    pub extensions: Vec<String>,
    pub media_types: Vec<String>,
}

struct Registration {
    info: FormatInfo,
    materializer: Arc<dyn Materializer>,
}

#[derive(Default)]
struct Tables {
    by_name: BTreeMap<String, Registration>,
    by_extension: BTreeMap<String, String>,
    by_media_type: BTreeMap<String, String>,
}

impl Tables {
    fn lookup(&self, index: &BTreeMap<String, String>, key: &str) -> Option<Arc<dyn Materializer>> {
        index
            .get(key)
            .and_then(|name| self.by_name.get(name))
            .map(|r| Arc::clone(&r.materializer))
    }

    fn unlink(&mut self, name: &str) -> Option<Registration> {
        let removed = self.by_name.remove(name)?;
        self.by_extension.retain(|_, n| n != name);
        self.by_media_type.retain(|_, n| n != name);
        Some(removed)
    }
}

/// Run-time registry of materializers.
#[derive(Default)]
pub struct MaterializerRegistry {
    tables: RwLock<Tables>,
}

impl fmt::Debug for MaterializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializerRegistry")
            .field("formats", &self.tables.read().by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MaterializerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in materializers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            "text",
            &["txt", "text", "log"],
            &["text/plain"],
            Arc::new(TextMaterializer),
        );
        registry.register(
            "archive",
            &["zip"],
            &["application/zip"],
            Arc::new(ArchiveListingMaterializer),
        );
        registry
    }

    /// Register (or replace) a materializer under `name`.
    ///
    /// Extensions and media types claimed by another registration move to the
    /// new one.
    pub fn register(
        &self,
        name: &str,
        extensions: &[&str],
        media_types: &[&str],
        materializer: Arc<dyn Materializer>,
    ) {
        let info = FormatInfo {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            media_types: media_types.iter().map(|m| essence(m)).collect(),
        };

        let mut tables = self.tables.write();
        tables.unlink(name);
        for ext in &info.extensions {
            tables.by_extension.insert(ext.clone(), name.to_string());
        }
        for media_type in &info.media_types {
            tables.by_media_type.insert(media_type.clone(), name.to_string());
        }
        tables
            .by_name
            .insert(name.to_string(), Registration { info, materializer });
        tracing::debug!(name, "registered materializer");
    }

    /// Remove a materializer. Returns `false` if none was registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.tables.write().unlink(name).is_some();
        if removed {
            tracing::debug!(name, "removed materializer");
        }
        removed
    }

    /// Registered formats in name order.
    #[must_use]
    pub fn formats(&self) -> Vec<FormatInfo> {
        self.tables
            .read()
            .by_name
            .values()
            .map(|r| r.info.clone())
            .collect()
    }

    /// Choose the materializer for a call.
    ///
    /// `peek` holds the leading bytes of the source and is only consulted
    /// when neither the declared type nor the extension decides.
    pub fn resolve_for(
        &self,
        config: &Configuration,
        peek: &[u8],
    ) -> Result<Arc<dyn Materializer>, QuarryError> {
        let tables = self.tables.read();

        if let Some(declared) = config.media_type() {
            let declared = essence(declared);
            return tables
                .lookup(&tables.by_media_type, &declared)
                .ok_or(QuarryError::UnsupportedFormat(declared));
        }

        if let Some(ext) = config.location().and_then(extension_of)
            && let Some(m) = tables.lookup(&tables.by_extension, &ext)
        {
            return Ok(m);
        }

        let sniffed = sniff(peek);
        tables
            .lookup(&tables.by_media_type, sniffed)
            .ok_or_else(|| QuarryError::UnsupportedFormat(sniffed.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
