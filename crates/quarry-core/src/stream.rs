//! # Streaming Executor
//!
//! Lazily materialized, single-pass quad sequences.
//!
//! A dedicated producer thread runs the materializer into a `GraphSink`
//! whose emitter pushes every quad into a bounded channel. The consumer pulls
//! quads in emission order; when it falls behind the producer blocks. When
//! the consumer drops the stream, the producer's next emission fails and the
//! materialization stops.
//!
//! Streams are not restartable and never enter the cache.

use crate::config::Configuration;
use crate::graph::Graph;
use crate::materializer::{Materializer, Source};
use crate::primitives::{RDF_TYPE, ROOT_TYPE};
use crate::sink::{GraphCounts, GraphSink, QuadEmitter, SinkOptions};
use crate::{Quad, QuarryError, Term};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

// =============================================================================
// CHANNEL EMITTER
// =============================================================================

enum StreamItem {
    Quad(Quad),
    Failed(QuarryError),
    Done(GraphCounts),
}

/// Emitter that forwards quads to a `QuadStream` consumer.
///
/// A stream keeps no set of what it already sent, so every emission is
/// accepted: a materializer that writes the same quad twice yields it twice,
/// and the streamed counts (and audit quads) count it twice. A collected
/// graph deduplicates and counts it once.
pub struct ChannelEmitter {
    tx: SyncSender<StreamItem>,
}

impl QuadEmitter for ChannelEmitter {
    fn emit(&mut self, quad: Quad) -> Result<bool, QuarryError> {
        self.tx
            .send(StreamItem::Quad(quad))
            .map_err(|_| QuarryError::MaterializationFailed("stream consumer went away".into()))?;
        Ok(true)
    }
}

// =============================================================================
// QUAD STREAM
// =============================================================================

/// Single-pass sequence of materialized quads.
///
/// Yields `Err` once if the materializer fails, then ends.
pub struct QuadStream {
    rx: Receiver<StreamItem>,
    producer: Option<JoinHandle<()>>,
    counts: Option<GraphCounts>,
    finished: bool,
}

impl std::fmt::Debug for QuadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Iterator for QuadStream {
    type Item = Result<Quad, QuarryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(StreamItem::Quad(quad)) => Some(Ok(quad)),
            Ok(StreamItem::Failed(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Ok(StreamItem::Done(counts)) => {
                self.finished = true;
                self.counts = Some(counts);
                None
            }
            // Producer vanished without a terminal item: it panicked.
            Err(_) => {
                self.finished = true;
                if let Some(handle) = self.producer.take() {
                    let _ = handle.join();
                }
                Some(Err(QuarryError::MaterializationFailed(
                    "stream producer terminated unexpectedly".into(),
                )))
            }
        }
    }
}

impl QuadStream {
    /// Group the stream into per-member slices.
    #[must_use]
    pub fn slices(self) -> Slices {
        Slices {
            stream: self,
            roots: BTreeSet::new(),
            carried: Vec::new(),
            current: None,
            emitted_any: false,
            seen_any: false,
            done: false,
        }
    }

    /// Per-graph counts gathered by the producer's sink; available once the
    /// stream ended successfully.
    #[must_use]
    pub fn counts(&self) -> Option<&GraphCounts> {
        self.counts.as_ref()
    }

    /// Drain the stream into a graph.
    pub fn collect_graph(self) -> Result<Graph, QuarryError> {
        let mut graph = Graph::new();
        for quad in self {
            graph.insert(quad?);
        }
        Ok(graph)
    }
}

/// Run `materializer` over `source` on a producer thread.
pub fn materialize_lazily(
    config: Configuration,
    materializer: Arc<dyn Materializer>,
    mut source: Source,
    options: SinkOptions,
    buffer: usize,
) -> Result<QuadStream, QuarryError> {
    let (tx, rx) = sync_channel(buffer.max(1));
    let name = materializer.name().to_string();

    let producer = std::thread::Builder::new()
        .name(format!("quarry-stream-{}", name))
        .spawn(move || {
            let mut emitter = ChannelEmitter { tx: tx.clone() };
            let (result, counts) = {
                let mut sink = GraphSink::new(&mut emitter, options);
                let result = materializer.triplify(&mut source, &config, &mut sink);
                (result, sink.finish())
            };
            let last = match result {
                Ok(()) => StreamItem::Done(counts),
                Err(e) => {
                    tracing::debug!(materializer = %name, error = %e, "stream producer stopped");
                    StreamItem::Failed(e)
                }
            };
            // The consumer may already be gone; nothing left to tell it then.
            let _ = tx.send(last);
        })
        .map_err(QuarryError::from)?;

    Ok(QuadStream {
        rx,
        producer: Some(producer),
        counts: None,
        finished: false,
    })
}

// =============================================================================
// SLICES
// =============================================================================

/// Iterator over per-top-level-member slices of a `QuadStream`.
///
/// A membership edge leaving a root starts a new slice. Other quads about a
/// root (its typing quad, named fields) are carried into every slice, so a
/// pattern that joins root and member data can be evaluated per slice.
pub struct Slices {
    stream: QuadStream,
    roots: BTreeSet<Term>,
    carried: Vec<Quad>,
    current: Option<Vec<Quad>>,
    emitted_any: bool,
    seen_any: bool,
    done: bool,
}

impl std::fmt::Debug for Slices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slices")
            .field("roots", &self.roots)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Slices {
    /// Counts of the underlying stream, once it ended successfully.
    #[must_use]
    pub fn counts(&self) -> Option<&GraphCounts> {
        self.stream.counts()
    }

    fn is_root_typing(quad: &Quad) -> bool {
        quad.predicate.as_iri() == Some(RDF_TYPE) && quad.object.as_iri() == Some(ROOT_TYPE)
    }

    fn finish(&mut self) -> Option<Vec<Quad>> {
        self.done = true;
        match self.current.take() {
            Some(slice) => Some(slice),
            // No member at all: the root data alone is the only slice.
            None if !self.emitted_any && !self.carried.is_empty() => {
                Some(std::mem::take(&mut self.carried))
            }
            None => None,
        }
    }
}

impl Iterator for Slices {
    type Item = Result<Vec<Quad>, QuarryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let quad = match self.stream.next() {
                None => return self.finish().map(Ok),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(quad)) => quad,
            };

            if Self::is_root_typing(&quad) {
                self.roots.insert(quad.subject.clone());
            } else if !self.seen_any && self.roots.is_empty() {
                // Untyped roots: the first subject emitted is the root.
                self.roots.insert(quad.subject.clone());
            }
            self.seen_any = true;

            let about_root = self.roots.contains(&quad.subject);
            if about_root && quad.predicate.membership_ordinal().is_some() {
                let mut next = self.carried.clone();
                next.push(quad);
                if let Some(finished) = self.current.replace(next) {
                    self.emitted_any = true;
                    return Some(Ok(finished));
                }
                continue;
            }

            if about_root {
                self.carried.push(quad.clone());
            }
            match self.current.as_mut() {
                Some(slice) => slice.push(quad),
                None if !about_root => self.carried.push(quad),
                None => {}
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::TextMaterializer;
    use crate::sink::CollectingEmitter;

    /// Writes one member and then repeats the same quad.
    struct Repeating;

    impl Materializer for Repeating {
        fn name(&self) -> &str {
            "repeating"
        }

        fn triplify(
            &self,
            _source: &mut Source,
            _config: &Configuration,
            sink: &mut GraphSink<'_>,
        ) -> Result<(), QuarryError> {
            let root = sink.add_root()?;
            sink.add_member(&root, Some(Term::literal("x")))?;
            sink.triple(root.clone(), Term::membership(1), Term::literal("x"))
        }
    }

    fn text_stream(text: &str, split: Option<&str>, buffer: usize) -> QuadStream {
        let mut pairs = vec![("content", text)];
        if let Some(sep) = split {
            pairs.push(("txt.split", sep));
        }
        let config = Configuration::from_pairs(pairs).expect("config");
        let source = Source::from_bytes("t.txt", text.as_bytes().to_vec());
        let options = SinkOptions::from_config(&config, u64::MAX);
        materialize_lazily(config, Arc::new(TextMaterializer), source, options, buffer)
            .expect("spawn")
    }

    #[test]
    fn streams_in_emission_order() {
        let quads: Vec<Quad> = text_stream("a,b,c", Some(","), 1)
            .collect::<Result<_, _>>()
            .expect("stream");
        // root typing, then three members
        assert_eq!(quads.len(), 4);
        assert_eq!(quads[0].object, Term::iri(ROOT_TYPE));
        let ordinals: Vec<_> = quads[1..]
            .iter()
            .filter_map(|q| q.predicate.membership_ordinal())
            .collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn slices_carry_root_typing() {
        let slices: Vec<Vec<Quad>> = text_stream("a,b,c", Some(","), 2)
            .slices()
            .collect::<Result<_, _>>()
            .expect("slices");
        assert_eq!(slices.len(), 3);
        for slice in &slices {
            assert_eq!(slice.len(), 2);
            assert!(slice.iter().any(|q| q.object == Term::iri(ROOT_TYPE)));
        }
    }

    #[test]
    fn dropping_stream_stops_producer() {
        let text = "x,".repeat(10_000);
        let mut stream = text_stream(&text, Some(","), 1);
        assert!(stream.next().is_some());
        drop(stream);
        // Nothing to assert beyond not hanging: the producer's next send fails.
    }

    #[test]
    fn failure_surfaces_once() {
        let config = Configuration::from_pairs([("content", "a"), ("txt.split", "(")]).expect("config");
        let source = Source::from_bytes("t.txt", b"a".to_vec());
        let options = SinkOptions::from_config(&config, u64::MAX);
        let mut stream =
            materialize_lazily(config, Arc::new(TextMaterializer), source, options, 4).expect("spawn");

        let mut errors = 0;
        for item in stream.by_ref() {
            if item.is_err() {
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
        assert!(stream.next().is_none());
    }

    #[test]
    fn collects_into_graph() {
        let graph = text_stream("hello", None, 4).collect_graph().expect("graph");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn counts_after_exhaustion() {
        let mut stream = text_stream("a,b", Some(","), 4);
        assert!(stream.counts().is_none());
        for item in stream.by_ref() {
            item.expect("quad");
        }
        assert_eq!(stream.counts().map(GraphCounts::total), Some(3));
    }

    #[test]
    fn streamed_counts_are_per_emission() {
        let config = Configuration::from_pairs([("content", "x")]).expect("config");
        let options = SinkOptions::from_config(&config, u64::MAX);

        let mut stream = materialize_lazily(
            config.clone(),
            Arc::new(Repeating),
            Source::from_bytes("t", b"x".to_vec()),
            options.clone(),
            4,
        )
        .expect("spawn");
        let streamed = stream.by_ref().collect::<Result<Vec<_>, _>>().expect("stream");
        assert_eq!(streamed.len(), 3);
        assert_eq!(stream.counts().map(GraphCounts::total), Some(3));

        let mut emitter = CollectingEmitter::new();
        let counts = {
            let mut sink = GraphSink::new(&mut emitter, options);
            Repeating
                .triplify(&mut Source::from_bytes("t", b"x".to_vec()), &config, &mut sink)
                .expect("collect");
            sink.finish()
        };
        assert_eq!(counts.total(), 2);
        assert_eq!(emitter.into_graph().len(), 2);
    }
}
