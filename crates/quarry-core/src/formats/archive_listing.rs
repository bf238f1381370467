//! Archive listing materializer.
//!
//! Emits one member literal per archive entry name (optionally filtered by
//! `archive.matches`). No entry is decompressed; an enclosing query feeds the
//! names into nested calls with `from-archive` to triplify each member.

use crate::archive::ArchiveResolver;
use crate::config::Configuration;
use crate::materializer::{Materializer, Source};
use crate::primitives::KEY_ARCHIVE_MATCHES;
use crate::sink::GraphSink;
use crate::{QuarryError, Term};

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveListingMaterializer;

impl Materializer for ArchiveListingMaterializer {
    fn name(&self) -> &str {
        "archive"
    }

    fn triplify(
        &self,
        source: &mut Source,
        config: &Configuration,
        sink: &mut GraphSink<'_>,
    ) -> Result<(), QuarryError> {
        let bytes = source.read_to_end()?;
        let entries = ArchiveResolver::list_bytes(bytes, config.get(KEY_ARCHIVE_MATCHES))?;
        tracing::debug!(archive = source.name(), entries = entries.len(), "listed archive");

        let root = sink.add_root()?;
        for entry in entries {
            sink.add_member(&root, Some(Term::literal(entry)))?;
        }
        Ok(())
    }
}
