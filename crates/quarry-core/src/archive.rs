//! # Archive Resolver
//!
//! Lazy access to the members of a zip container.
//!
//! `open_entry` decompresses only the requested entry; `list_entries` reads
//! the central directory and decompresses nothing. A corrupt sibling entry
//! therefore never affects a request for a healthy one.
//!
//! An opened entry is streamed: a reader thread owns the archive and hands
//! decompressed chunks through a bounded channel, so an entry is never held
//! in memory as a whole.

use crate::materializer::fetch;
use crate::QuarryError;
use regex::Regex;
use std::io::{self, Cursor, Read, Seek};
use std::sync::mpsc::{Receiver, sync_channel};
use zip::ZipArchive;
use zip::result::ZipError;

/// Size of one decompressed chunk.
const ENTRY_CHUNK: usize = 64 * 1024;
/// Chunks the reader thread may run ahead of the consumer.
const CHUNKS_IN_FLIGHT: usize = 4;

/// Readers the zip decoder can work with.
trait ArchiveReader: Read + Seek + Send {}
impl<T: Read + Seek + Send> ArchiveReader for T {}

/// Stateless namespace for archive operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveResolver;

impl ArchiveResolver {
    /// The byte stream of one entry.
    ///
    /// `EntryNotFound` is reported here; corruption inside the entry surfaces
    /// from `read` as an I/O error that converts back into
    /// `MaterializationFailed`.
    pub fn open_entry(archive: &str, entry: &str) -> Result<Box<dyn Read + Send>, QuarryError> {
        let mut zip = Self::open(archive)?;
        let (opened_tx, opened_rx) = sync_channel::<Result<(), QuarryError>>(1);
        let (tx, rx) = sync_channel(CHUNKS_IN_FLIGHT);
        let (archive_name, entry_name) = (archive.to_string(), entry.to_string());

        std::thread::Builder::new()
            .name(format!("quarry-entry-{}", entry))
            .spawn(move || {
                let mut file = match zip.by_name(&entry_name) {
                    Ok(file) => file,
                    Err(e) => {
                        let _ = opened_tx.send(Err(entry_error(&archive_name, &entry_name, e)));
                        return;
                    }
                };
                let _ = opened_tx.send(Ok(()));

                let mut buf = vec![0u8; ENTRY_CHUNK];
                let mut total = 0usize;
                loop {
                    let chunk = match file.read(&mut buf) {
                        Ok(0) => Ok(Vec::new()),
                        Ok(n) => {
                            total = total.saturating_add(n);
                            Ok(buf[..n].to_vec())
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(QuarryError::MaterializationFailed(format!(
                            "{}!{}: {}",
                            archive_name, entry_name, e
                        ))),
                    };
                    let last = !matches!(&chunk, Ok(bytes) if !bytes.is_empty());
                    // A send fails once the consumer dropped the reader.
                    if tx.send(chunk).is_err() || last {
                        break;
                    }
                }
                tracing::debug!(archive = %archive_name, entry = %entry_name, bytes = total, "read archive entry");
            })
            .map_err(QuarryError::from)?;

        opened_rx.recv().map_err(|_| {
            QuarryError::MaterializationFailed(format!("{}!{}: reader thread vanished", archive, entry))
        })??;
        Ok(Box::new(EntryReader {
            rx,
            chunk: Cursor::new(Vec::new()),
            finished: false,
        }))
    }

    /// Entry names matching `pattern` (all file entries when `None`), in
    /// archive order. Directory entries are skipped.
    pub fn list_entries(archive: &str, pattern: Option<&str>) -> Result<Vec<String>, QuarryError> {
        let filter = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| QuarryError::InvalidConfiguration(format!("archive.matches: {}", e)))?;
        let zip = Self::open(archive)?;
        Ok(Self::matching_names(&zip, filter.as_ref()))
    }

    /// Entry names of an already opened archive held in memory.
    pub fn list_bytes(bytes: Vec<u8>, pattern: Option<&str>) -> Result<Vec<String>, QuarryError> {
        let filter = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| QuarryError::InvalidConfiguration(format!("archive.matches: {}", e)))?;
        let zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| QuarryError::MaterializationFailed(format!("not a zip archive: {}", e)))?;
        Ok(Self::matching_names(&zip, filter.as_ref()))
    }

    fn matching_names<R: Read + Seek>(zip: &ZipArchive<R>, filter: Option<&Regex>) -> Vec<String> {
        zip.file_names()
            .filter(|name| !name.ends_with('/'))
            .filter(|name| filter.is_none_or(|re| re.is_match(name)))
            .map(str::to_string)
            .collect::<Vec<_>>()
    }

    fn open(archive: &str) -> Result<ZipArchive<Box<dyn ArchiveReader>>, QuarryError> {
        let reader: Box<dyn ArchiveReader> = match crate::materializer::local_path(archive) {
            path if path.exists() => Box::new(std::fs::File::open(&path).map_err(|e| {
                QuarryError::FetchFailed(format!("{}: {}", path.display(), e))
            })?),
            _ => {
                let mut bytes = Vec::new();
                fetch(archive)?.read_to_end(&mut bytes)?;
                Box::new(Cursor::new(bytes))
            }
        };
        ZipArchive::new(reader).map_err(|e| {
            QuarryError::MaterializationFailed(format!("{} is not a zip archive: {}", archive, e))
        })
    }
}

fn entry_error(archive: &str, entry: &str, e: ZipError) -> QuarryError {
    match e {
        ZipError::FileNotFound => QuarryError::EntryNotFound {
            archive: archive.to_string(),
            entry: entry.to_string(),
        },
        other => QuarryError::MaterializationFailed(format!("{}!{}: {}", archive, entry, other)),
    }
}

// =============================================================================
// ENTRY READER
// =============================================================================

/// Consumer side of an opened entry. An empty chunk marks the end.
struct EntryReader {
    rx: Receiver<Result<Vec<u8>, QuarryError>>,
    chunk: Cursor<Vec<u8>>,
    finished: bool,
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.chunk.read(buf)?;
            if n > 0 || buf.is_empty() || self.finished {
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(Ok(bytes)) if bytes.is_empty() => self.finished = true,
                Ok(Ok(bytes)) => self.chunk = Cursor::new(bytes),
                Ok(Err(e)) => {
                    self.finished = true;
                    return Err(io::Error::other(e));
                }
                Err(_) => {
                    self.finished = true;
                    return Err(io::Error::other(QuarryError::MaterializationFailed(
                        "archive reader terminated unexpectedly".into(),
                    )));
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
