//! # Materializer Contract
//!
//! A materializer turns the bytes of one source into quads written through a
//! `GraphSink`. Materializers are chosen per call by the registry and are
//! independently replaceable per format.
//!
//! This module also opens the byte stream a configuration points at: inline
//! content, an archive entry, a local file or (with the `http` feature) a
//! remote document.

use crate::archive::ArchiveResolver;
use crate::config::Configuration;
use crate::primitives::SNIFF_WINDOW;
use crate::sink::GraphSink;
use crate::QuarryError;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::PathBuf;

// =============================================================================
// MATERIALIZER TRAIT
// =============================================================================

/// Per-format triplifier.
///
/// Implementations must be deterministic: the same bytes and the same
/// configuration produce isomorphic output.
pub trait Materializer: Send + Sync {
    /// Short, unique name used for registration and logging.
    fn name(&self) -> &str;

    /// Decode `source` and write its generic-model rendition into `sink`.
    fn triplify(
        &self,
        source: &mut Source,
        config: &Configuration,
        sink: &mut GraphSink<'_>,
    ) -> Result<(), QuarryError>;
}

// =============================================================================
// SOURCE
// =============================================================================

/// An opened input: a name for format detection plus a buffered reader.
pub struct Source {
    name: String,
    reader: BufReader<Box<dyn Read + Send>>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Source {
    /// Wrap an arbitrary reader.
    #[must_use]
    pub fn new(name: impl Into<String>, reader: Box<dyn Read + Send>) -> Self {
        Self {
            name: name.into(),
            reader: BufReader::with_capacity(SNIFF_WINDOW.max(8 * 1024), reader),
        }
    }

    /// An in-memory source.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, Box::new(Cursor::new(bytes)))
    }

    /// Open whatever the configuration points at.
    ///
    /// Precedence: inline `content`, then `from-archive` (the location is the
    /// entry path), then the location itself.
    pub fn open(config: &Configuration) -> Result<Self, QuarryError> {
        if let Some(content) = config.content() {
            let name = config.location().unwrap_or("content").to_string();
            return Ok(Self::from_bytes(name, content.as_bytes().to_vec()));
        }
        let location = config.location().ok_or(QuarryError::MissingLocation)?;
        if let Some(archive) = config.from_archive() {
            let reader = ArchiveResolver::open_entry(archive, location)?;
            return Ok(Self::new(location, reader));
        }
        Ok(Self::new(location, fetch(location)?))
    }

    /// Name used for extension lookup (location or archive entry path).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Up to `SNIFF_WINDOW` leading bytes, without consuming them.
    pub fn peek(&mut self) -> Result<&[u8], QuarryError> {
        let buf = self.reader.fill_buf()?;
        Ok(&buf[..buf.len().min(SNIFF_WINDOW)])
    }

    /// The whole remaining input.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, QuarryError> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// The whole remaining input as UTF-8 text.
    pub fn read_to_string(&mut self) -> Result<String, QuarryError> {
        let bytes = self.read_to_end()?;
        String::from_utf8(bytes).map_err(|e| {
            QuarryError::MaterializationFailed(format!("{} is not valid UTF-8: {}", self.name, e))
        })
    }

    /// Borrow the buffered reader for incremental decoding.
    pub fn reader(&mut self) -> &mut dyn BufRead {
        &mut self.reader
    }
}

// =============================================================================
// FETCHING
// =============================================================================

/// Open a location for reading.
///
/// Plain paths and `file://` IRIs are read from the filesystem. `http(s)`
/// locations need the `http` feature.
pub fn fetch(location: &str) -> Result<Box<dyn Read + Send>, QuarryError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return fetch_remote(location);
    }
    let path = local_path(location);
    let file = File::open(&path)
        .map_err(|e| QuarryError::FetchFailed(format!("{}: {}", path.display(), e)))?;
    Ok(Box::new(file))
}

/// Map a location to a filesystem path (`file://` prefix stripped).
#[must_use]
pub fn local_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

#[cfg(feature = "http")]
fn fetch_remote(location: &str) -> Result<Box<dyn Read + Send>, QuarryError> {
    tracing::debug!(location, "fetching remote source");
    let response = reqwest::blocking::get(location)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|e| QuarryError::FetchFailed(format!("{}: {}", location, e)))?;
    let bytes = response
        .bytes()
        .map_err(|e| QuarryError::FetchFailed(format!("{}: {}", location, e)))?;
    Ok(Box::new(Cursor::new(bytes.to_vec())))
}

#[cfg(not(feature = "http"))]
fn fetch_remote(location: &str) -> Result<Box<dyn Read + Send>, QuarryError> {
    Err(QuarryError::FetchFailed(format!(
        "{}: remote locations need the `http` feature",
        location
    )))
}

// =============================================================================
// TESTS
// =============================================================================
