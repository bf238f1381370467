//! # redb-backed Durable Store
//!
//! Persists one materialized graph per `ondisk` directory using the redb
//! embedded database.
//!
//! ## Reuse semantics
//!
//! Reuse is keyed by the directory path, not by the configuration: a store
//! written by one configuration is served to any later call pointing at the
//! same directory with `ondisk.reuse=true`. The fingerprint recorded at write
//! time lets the cache notice (and log) such a mismatch.

use crate::config::Fingerprint;
use crate::graph::Graph;
use crate::primitives::{DURABLE_FILE_NAME, DURABLE_FORMAT_VERSION};
use crate::{Quad, QuarryError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};

/// Table for quads: sequence number -> postcard-encoded Quad
const QUADS: TableDefinition<u64, &[u8]> = TableDefinition::new("quads");

/// Table for numeric metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Table for descriptive metadata: key string -> text
const LABELS: TableDefinition<&str, &str> = TableDefinition::new("labels");

fn io_err(e: impl std::fmt::Display) -> QuarryError {
    QuarryError::IoError(e.to_string())
}

/// A durable graph store living at `<dir>/quarry.redb`.
pub struct DurableStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// The database file inside an `ondisk` directory.
    #[must_use]
    pub fn file_in(dir: &Path) -> PathBuf {
        dir.join(DURABLE_FILE_NAME)
    }

    /// Whether a store was already written in `dir`.
    #[must_use]
    pub fn exists_in(dir: &Path) -> bool {
        Self::file_in(dir).is_file()
    }

    /// Open or create the store in `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self, QuarryError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_in(dir);
        let db = Database::create(&path).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(QUADS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            let _ = write_txn.open_table(LABELS).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored graph in a single transaction.
    pub fn write_graph(
        &self,
        graph: &Graph,
        fingerprint: &Fingerprint,
        locator: &str,
    ) -> Result<(), QuarryError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            write_txn.delete_table(QUADS).map_err(io_err)?;
            let mut quads = write_txn.open_table(QUADS).map_err(io_err)?;
            for (seq, quad) in (0u64..).zip(graph.iter()) {
                let bytes = postcard::to_allocvec(quad)
                    .map_err(|e| QuarryError::SerializationError(e.to_string()))?;
                quads.insert(seq, bytes.as_slice()).map_err(io_err)?;
            }

            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            meta.insert("format_version", DURABLE_FORMAT_VERSION)
                .map_err(io_err)?;
            meta.insert("quad_count", graph.len() as u64)
                .map_err(io_err)?;

            let mut labels = write_txn.open_table(LABELS).map_err(io_err)?;
            labels
                .insert("fingerprint", fingerprint.to_hex().as_str())
                .map_err(io_err)?;
            labels.insert("locator", locator).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), quads = graph.len(), "wrote durable store");
        Ok(())
    }

    /// Load the stored graph.
    pub fn read_graph(&self) -> Result<Graph, QuarryError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;

        let version = {
            let meta = read_txn.open_table(METADATA).map_err(io_err)?;
            meta.get("format_version")
                .map_err(io_err)?
                .map(|v| v.value())
        };
        match version {
            Some(DURABLE_FORMAT_VERSION) => {}
            Some(other) => {
                return Err(QuarryError::SerializationError(format!(
                    "durable store {} has format version {}, expected {}",
                    self.path.display(),
                    other,
                    DURABLE_FORMAT_VERSION
                )));
            }
            None => {
                return Err(QuarryError::SerializationError(format!(
                    "durable store {} holds no graph",
                    self.path.display()
                )));
            }
        }

        let table = read_txn.open_table(QUADS).map_err(io_err)?;
        let mut graph = Graph::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            let quad: Quad = postcard::from_bytes(value.value())
                .map_err(|e| QuarryError::SerializationError(e.to_string()))?;
            graph.insert(quad);
        }
        Ok(graph)
    }

    /// Number of stored quads.
    pub fn len(&self) -> Result<u64, QuarryError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(QUADS).map_err(io_err)?;
        table.len().map_err(io_err)
    }

    /// Fingerprint (hex) of the configuration that wrote the store.
    pub fn stored_fingerprint(&self) -> Result<Option<String>, QuarryError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let labels = read_txn.open_table(LABELS).map_err(io_err)?;
        Ok(labels
            .get("fingerprint")
            .map_err(io_err)?
            .map(|v| v.value().to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
