//! # Control Plane Tests
//!
//! End-to-end behaviour of the engine, grouped by concern.
//!
//! ## Groups
//! - C0: Cache discipline (at-most-once, bypass, durable reuse)
//! - C1: Error containment (SILENT, nested propagation)
//! - C2: Correlated and nested resolution
//! - C3: Archives
//! - C4: Session state and audit

use quarry_core::primitives::{
    AUDIT_DEFAULT_GRAPH, AUDIT_GRAPH, AUDIT_TRIPLES, CONFIG_SUBJECT, QUARRY_NS, RDF_TYPE,
};
use quarry_core::{
    Binding, CollectingEmitter, Configuration, Engine, EngineContext, EngineSettings, GraphSink,
    Materializer, PatternElement, PatternTerm, QuarryError, RemoteServiceHandler, ServiceCall,
    SinkOptions, Source, Term, TextMaterializer, TriplePattern,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// HELPERS
// =============================================================================

fn engine() -> Engine {
    Engine::new(Arc::new(EngineContext::default()))
}

fn triple(s: PatternTerm, p: PatternTerm, o: PatternTerm) -> PatternElement {
    PatternElement::Triple(TriplePattern::new(s, p, o))
}

fn option(key: &str, value: PatternTerm) -> PatternElement {
    triple(
        PatternTerm::iri(CONFIG_SUBJECT),
        PatternTerm::iri(format!("{}{}", QUARRY_NS, key)),
        value,
    )
}

fn members(root: &str, slot: &str, value: &str) -> PatternElement {
    triple(PatternTerm::var(root), PatternTerm::var(slot), PatternTerm::var(value))
}

fn member_values(rows: &[Binding], slot: &str, value: &str) -> Vec<String> {
    let mut values: Vec<String> = rows
        .iter()
        .filter(|r| r.get(slot).and_then(Term::membership_ordinal).is_some())
        .filter_map(|r| r.get(value).map(|t| t.lexical().to_string()))
        .collect();
    values.sort();
    values
}

fn write_file(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write");
    path.display().to_string()
}

/// Materializer that counts its invocations and takes a while.
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl Materializer for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn triplify(
        &self,
        source: &mut Source,
        _config: &Configuration,
        sink: &mut GraphSink<'_>,
    ) -> Result<(), QuarryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        let text = source.read_to_string()?;
        let root = sink.add_root()?;
        sink.add_member(&root, Some(Term::literal(text)))?;
        Ok(())
    }
}

// =============================================================================
// GROUP C0: CACHE DISCIPLINE
// =============================================================================

mod c0_cache {
    use super::*;

    /// C0.1: N concurrent requests for one fingerprint build once.
    #[test]
    fn at_most_once_under_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let context = Arc::new(EngineContext::default());
        context.registry().register(
            "counting",
            &["cnt"],
            &["application/x-counting"],
            Arc::new(Counting {
                calls: Arc::clone(&calls),
            }),
        );
        let engine = Engine::new(context);
        let config = engine
            .configuration("x-quarry:location=shared.cnt,content=payload")
            .expect("config");

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| engine.materialize(&config).expect("materialize")))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("join"))
                .collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(engine.context().cache().builds(), 1);
    }

    /// C0.2: Same bytes and configuration give isomorphic graphs across
    /// independent engines.
    #[test]
    fn roundtrip_isomorphic() {
        let locator = "x-quarry:content=a=1 b=2 c=3,txt.regex=(\\\\w)\\=(\\\\d)";
        let first = engine();
        let second = engine();
        let a = first
            .materialize(&first.configuration(locator).expect("config"))
            .expect("first");
        let b = second
            .materialize(&second.configuration(locator).expect("config"))
            .expect("second");
        assert!(a.graph.len() > 2);
        assert!(a.graph.is_isomorphic(&b.graph));
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    /// C0.3: Streamed calls never enter the cache.
    #[test]
    fn streaming_bypasses_cache() {
        let engine = engine();
        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=a\\,b\\,c,txt.split=\\,,slice=true"),
            vec![members("root", "slot", "value")],
        );
        let rows = engine
            .begin()
            .evaluate_service(&call, &[Binding::new()])
            .expect("evaluate");
        assert_eq!(member_values(&rows, "slot", "value"), vec!["a", "b", "c"]);
        assert_eq!(engine.context().cache().builds(), 0);
    }

    /// C0.4: Durable reuse is keyed by directory, not configuration.
    #[test]
    fn durable_reuse_across_engines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ondisk = dir.path().display().to_string();

        let first = engine();
        let config = Configuration::from_pairs([
            ("content", "one"),
            ("ondisk", ondisk.as_str()),
            ("ondisk.reuse", "true"),
        ])
        .expect("config");
        let built = first.materialize(&config).expect("build");
        assert!(built.durable_path.is_some());

        let second = engine();
        let other = config.with("content", "two").expect("config");
        let reused = second.materialize(&other).expect("reuse");
        assert_eq!(reused.graph, built.graph);
    }
}

// =============================================================================
// GROUP C1: ERROR CONTAINMENT
// =============================================================================

mod c1_errors {
    use super::*;

    /// C1.1: A failing SILENT call yields zero rows and leaves other rows alone.
    #[test]
    fn silent_containment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = write_file(dir.path(), "good.txt", "fine");
        let engine = engine();

        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:"),
            vec![
                option("location", PatternTerm::var("file")),
                members("root", "slot", "value"),
            ],
        )
        .silent();
        let outer = vec![
            Binding::new().with("file", Term::literal(good)),
            Binding::new().with("file", Term::literal("/nonexistent/quarry.txt")),
        ];

        let rows = engine.begin().evaluate_service(&call, &outer).expect("silent");
        assert_eq!(member_values(&rows, "slot", "value"), vec!["fine"]);
    }

    /// C1.2: Without SILENT the first failure propagates.
    #[test]
    fn loud_failure_propagates() {
        let engine = engine();
        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:location=/nonexistent/quarry.txt"),
            vec![members("root", "slot", "value")],
        );
        let result = engine.begin().evaluate_service(&call, &[Binding::new()]);
        assert!(matches!(result, Err(QuarryError::FetchFailed(_))));
    }

    /// C1.3: An outer SILENT does not swallow a nested call's failure.
    #[test]
    fn nested_failure_escapes_outer_silent() {
        let engine = engine();
        let inner = ServiceCall::new(
            PatternTerm::iri("x-quarry:location=/nonexistent/quarry.txt"),
            vec![],
        );
        let outer = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=ok"),
            vec![members("root", "slot", "value"), PatternElement::Service(inner)],
        )
        .silent();
        let result = engine.begin().evaluate_service(&outer, &[Binding::new()]);
        assert!(matches!(result, Err(QuarryError::FetchFailed(_))));
    }

    /// C1.4: Nested calls beyond the configured depth fail.
    #[test]
    fn nesting_limit() {
        let settings = EngineSettings {
            max_nesting_depth: 2,
            ..EngineSettings::default()
        };
        let engine = Engine::new(Arc::new(EngineContext::new(settings)));

        let mut call = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=x"),
            vec![members("root", "slot", "value")],
        );
        for _ in 0..2 {
            call = ServiceCall::new(
                PatternTerm::iri("x-quarry:content=x"),
                vec![members("root", "slot", "value"), PatternElement::Service(call)],
            );
        }
        let result = engine.begin().evaluate_service(&call, &[Binding::new()]);
        assert_eq!(result, Err(QuarryError::NestingLimitExceeded(3)));
    }

    struct Echo;

    impl RemoteServiceHandler for Echo {
        fn execute(
            &self,
            endpoint: &str,
            _pattern: &[PatternElement],
            _row: &Binding,
        ) -> Result<Vec<Binding>, QuarryError> {
            Ok(vec![Binding::new().with("remote", Term::iri(endpoint))])
        }
    }

    /// C1.5: Other endpoints go to the remote handler; rows are joined.
    #[test]
    fn remote_delegation() {
        let engine = engine().with_remote(Arc::new(Echo));
        let call = ServiceCall::new(PatternTerm::iri("http://example.org/sparql"), vec![]);
        let outer = vec![Binding::new().with("n", Term::integer(7))];
        let rows = engine.begin().evaluate_service(&call, &outer).expect("delegate");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Term::integer(7)));
        assert_eq!(rows[0].get("remote"), Some(&Term::iri("http://example.org/sparql")));
    }

    /// C1.6: Unknown formats are reported as such.
    #[test]
    fn unsupported_format() {
        let engine = engine();
        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:content={\"a\":1},location=data.json"),
            vec![],
        );
        let result = engine.begin().evaluate_service(&call, &[Binding::new()]);
        assert!(matches!(result, Err(QuarryError::UnsupportedFormat(_))));
    }

    /// C1.7: Depth overflow of a SILENT call yields zero rows instead of failing.
    #[test]
    fn silent_call_beyond_nesting_limit() {
        let settings = EngineSettings {
            max_nesting_depth: 1,
            ..EngineSettings::default()
        };
        let engine = Engine::new(Arc::new(EngineContext::new(settings)));

        let inner = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=y"),
            vec![members("root", "slot", "value")],
        )
        .silent();
        let outer = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=x"),
            vec![members("root", "slot", "value"), PatternElement::Service(inner)],
        );
        let rows = engine
            .begin()
            .evaluate_service(&outer, &[Binding::new()])
            .expect("silent overflow");
        assert!(rows.is_empty());
        // Only the outer call materialized anything.
        assert_eq!(engine.context().cache().builds(), 1);
    }
}

// =============================================================================
// GROUP C2: CORRELATED AND NESTED RESOLUTION
// =============================================================================

mod c2_resolution {
    use super::*;

    /// C2.1: Configuration from outer bindings resolves once per distinct row.
    #[test]
    fn correlated_per_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = write_file(dir.path(), "a.txt", "alpha");
        let b = write_file(dir.path(), "b.txt", "beta");
        let engine = engine();

        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:"),
            vec![
                option("location", PatternTerm::var("file")),
                members("root", "slot", "value"),
            ],
        );
        let outer = vec![
            Binding::new().with("file", Term::literal(a.clone())).with("n", Term::integer(1)),
            Binding::new().with("file", Term::literal(b)).with("n", Term::integer(2)),
            Binding::new().with("file", Term::literal(a)).with("n", Term::integer(3)),
        ];

        let rows = engine.begin().evaluate_service(&call, &outer).expect("evaluate");
        assert_eq!(member_values(&rows, "slot", "value"), vec!["alpha", "alpha", "beta"]);
        // Every solution keeps its outer row.
        assert!(rows.iter().all(|r| r.get("n").is_some()));
        assert_eq!(engine.context().cache().builds(), 2);
    }

    /// C2.2: Multi-hop configuration subjects.
    #[test]
    fn multi_hop_configuration() {
        let engine = engine();
        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:"),
            vec![
                option("options", PatternTerm::var("o")),
                triple(
                    PatternTerm::var("o"),
                    PatternTerm::iri(format!("{}content", QUARRY_NS)),
                    PatternTerm::literal("deep"),
                ),
                members("root", "slot", "value"),
            ],
        );
        let rows = engine
            .begin()
            .evaluate_service(&call, &[Binding::new()])
            .expect("evaluate");
        assert_eq!(member_values(&rows, "slot", "value"), vec!["deep"]);
    }

    /// C2.3: Endpoint taken from an outer variable.
    #[test]
    fn endpoint_from_variable() {
        let engine = engine();
        let call = ServiceCall::new(PatternTerm::var("svc"), vec![members("root", "slot", "value")]);
        let outer = vec![Binding::new().with("svc", Term::iri("x-quarry:content=hi"))];
        let rows = engine.begin().evaluate_service(&call, &outer).expect("evaluate");
        assert_eq!(member_values(&rows, "slot", "value"), vec!["hi"]);
    }

    /// C2.4: Blank nodes of separate materializations are different nodes.
    #[test]
    fn blank_roots_do_not_join_across_documents() {
        let engine = engine();
        let nested = |outer_doc: &str, inner_doc: &str| {
            let inner = ServiceCall::new(
                PatternTerm::iri(format!("x-quarry:content={}", inner_doc)),
                vec![members("root", "inner_slot", "inner_value")],
            );
            let outer = ServiceCall::new(
                PatternTerm::iri(format!("x-quarry:content={}", outer_doc)),
                vec![members("root", "slot", "value"), PatternElement::Service(inner)],
            );
            engine
                .begin()
                .evaluate_service(&outer, &[Binding::new()])
                .expect("evaluate")
        };

        assert!(nested("document-A", "document-B").is_empty());
        // The same configuration is the same graph, so its root joins.
        assert_eq!(nested("document-A", "document-A").len(), 4);
    }
}

// =============================================================================
// GROUP C3: ARCHIVES
// =============================================================================

mod c3_archives {
    use super::*;
    use zip::write::SimpleFileOptions;

    const BETA: &[u8] = b"BETA-PAYLOAD-BETA-PAYLOAD";

    fn write_zip(dir: &Path) -> String {
        let path = dir.join("bundle.zip");
        let file = std::fs::File::create(&path).expect("create");
        let mut writer = zip::ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("a.txt", stored).expect("start");
        writer.write_all(b"alpha").expect("write");
        writer.start_file("b.txt", stored).expect("start");
        writer.write_all(BETA).expect("write");
        writer.finish().expect("finish");
        path.display().to_string()
    }

    /// Overwrite the stored body of b.txt so its checksum no longer matches.
    fn corrupt_beta(path: &str) {
        let mut bytes = std::fs::read(path).expect("read");
        let at = bytes
            .windows(BETA.len())
            .position(|w| w == BETA)
            .expect("payload present");
        for b in &mut bytes[at..at + BETA.len()] {
            *b = b'X';
        }
        std::fs::write(path, bytes).expect("write");
    }

    /// C3.1: A corrupt sibling never affects the requested entry.
    #[test]
    fn archive_isolation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zip = write_zip(dir.path());
        corrupt_beta(&zip);

        let engine = engine();
        let good = Configuration::from_pairs([("location", "a.txt"), ("from-archive", zip.as_str())])
            .expect("config");
        let graph = engine.materialize(&good).expect("healthy entry");
        assert!(graph.graph.iter().any(|q| q.object == Term::literal("alpha")));

        let bad = good.with("location", "b.txt").expect("config");
        assert!(matches!(
            engine.materialize(&bad),
            Err(QuarryError::MaterializationFailed(_))
        ));
    }

    /// C3.2: Missing entries are reported with both names.
    #[test]
    fn missing_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zip = write_zip(dir.path());
        let engine = engine();
        let config = Configuration::from_pairs([("location", "zzz.txt"), ("from-archive", zip.as_str())])
            .expect("config");
        assert!(matches!(
            engine.materialize(&config),
            Err(QuarryError::EntryNotFound { .. })
        ));
    }

    /// C3.3: An outer call lists entries, a nested call triplifies each one.
    #[test]
    fn listing_feeds_nested_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zip = write_zip(dir.path());
        let engine = engine();

        let inner = ServiceCall::new(
            PatternTerm::iri("x-quarry:"),
            vec![
                option("location", PatternTerm::var("entry")),
                option("from-archive", PatternTerm::literal(zip.clone())),
                option("root-type", PatternTerm::literal("false")),
                members("doc", "p", "text"),
            ],
        );
        let outer = ServiceCall::new(
            PatternTerm::iri(format!("x-quarry:location={},root-type=false", zip)),
            vec![members("root", "slot", "entry"), PatternElement::Service(inner)],
        );

        let rows = engine
            .begin()
            .evaluate_service(&outer, &[Binding::new()])
            .expect("evaluate");
        assert_eq!(member_values(&rows, "p", "text"), vec!["BETA-PAYLOAD-BETA-PAYLOAD", "alpha"]);
        // Listing plus one build per entry.
        assert_eq!(engine.context().cache().builds(), 3);
    }
}

// =============================================================================
// GROUP C4: SESSION STATE AND AUDIT
// =============================================================================

mod c4_session {
    use super::*;

    /// C4.1: Serial counters are per tuple and per execution.
    #[test]
    fn counter_scoping() {
        let engine = engine();
        let run = |values: &[&str]| -> Vec<Term> {
            let execution = engine.begin();
            values
                .iter()
                .map(|v| {
                    execution
                        .call_function("serial", &[Term::literal(*v)])
                        .expect("serial")
                })
                .collect()
        };

        assert_eq!(run(&["a", "b", "c"]), vec![Term::integer(1); 3]);
        assert_eq!(
            run(&["c", "c", "c"]),
            vec![Term::integer(1), Term::integer(2), Term::integer(3)]
        );
        // A new execution starts over.
        assert_eq!(run(&["c"]), vec![Term::integer(1)]);
    }

    /// C4.2: Audit quads report per-graph counts.
    #[test]
    fn audit_counts() {
        let engine = engine();
        let call = ServiceCall::new(
            PatternTerm::iri("x-quarry:content=a\\,b,txt.split=\\,,audit=true"),
            vec![PatternElement::Triple(
                TriplePattern::new(
                    PatternTerm::var("g"),
                    PatternTerm::iri(AUDIT_TRIPLES),
                    PatternTerm::var("n"),
                )
                .in_graph(PatternTerm::iri(AUDIT_GRAPH)),
            )],
        );
        let rows = engine
            .begin()
            .evaluate_service(&call, &[Binding::new()])
            .expect("evaluate");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("g"), Some(&Term::iri(AUDIT_DEFAULT_GRAPH)));
        assert_eq!(rows[0].get("n"), Some(&Term::integer(3)));
    }

    /// C4.3: Root typing can be queried and suppressed.
    #[test]
    fn root_typing() {
        let engine = engine();
        let typed = |locator: &str| {
            let call = ServiceCall::new(
                PatternTerm::iri(locator),
                vec![triple(
                    PatternTerm::var("root"),
                    PatternTerm::iri(RDF_TYPE),
                    PatternTerm::var("type"),
                )],
            );
            engine
                .begin()
                .evaluate_service(&call, &[Binding::new()])
                .expect("evaluate")
                .len()
        };
        assert_eq!(typed("x-quarry:content=x"), 1);
        assert_eq!(typed("x-quarry:content=x,root-type=false"), 0);
    }

    fn audit_call(locator: &str) -> ServiceCall {
        ServiceCall::new(
            PatternTerm::iri(locator),
            vec![PatternElement::Triple(
                TriplePattern::new(
                    PatternTerm::var("g"),
                    PatternTerm::iri(AUDIT_TRIPLES),
                    PatternTerm::var("n"),
                )
                .in_graph(PatternTerm::iri(AUDIT_GRAPH)),
            )],
        )
    }

    /// C4.4: Audit counts are the ones the sink kept while emitting.
    #[test]
    fn audit_matches_emitted_counts() {
        let engine = engine();
        let config = Configuration::from_pairs([("content", "a;b;c"), ("txt.split", ";")])
            .expect("config");
        let materialized = engine.materialize(&config).expect("materialize");

        let mut emitter = CollectingEmitter::new();
        let emitted = {
            let mut sink = GraphSink::new(
                &mut emitter,
                SinkOptions::from_config(&config, u64::MAX),
            );
            TextMaterializer
                .triplify(
                    &mut Source::from_bytes("inline", b"a;b;c".to_vec()),
                    &config,
                    &mut sink,
                )
                .expect("triplify");
            sink.finish()
        };
        assert_eq!(materialized.counts, emitted);
        assert_eq!(materialized.counts.audit_quads(), emitted.audit_quads());
    }

    /// C4.5: Streamed and collected materializations audit the same counts.
    #[test]
    fn streamed_and_collected_audit_agree() {
        let engine = engine();
        let audit = |locator: &str| -> Vec<(Option<Term>, Option<Term>)> {
            engine
                .begin()
                .evaluate_service(&audit_call(locator), &[Binding::new()])
                .expect("evaluate")
                .iter()
                .map(|row| (row.get("g").cloned(), row.get("n").cloned()))
                .collect()
        };

        let streamed = audit("x-quarry:content=a\\,b\\,c,txt.split=\\,,audit=true,slice=true");
        let collected = audit("x-quarry:content=a\\,b\\,c,txt.split=\\,,audit=true");
        assert_eq!(
            streamed,
            vec![(Some(Term::iri(AUDIT_DEFAULT_GRAPH)), Some(Term::integer(4)))]
        );
        assert_eq!(streamed, collected);
    }

    /// C4.6: Every outer row sees the audit quads of a shared materialization.
    #[test]
    fn audit_rows_for_every_outer_row() {
        let engine = engine();
        let outer = vec![
            Binding::new().with("k", Term::integer(1)),
            Binding::new().with("k", Term::integer(2)),
        ];
        let rows = engine
            .begin()
            .evaluate_service(&audit_call("x-quarry:content=a\\,b,txt.split=\\,,audit=true"), &outer)
            .expect("evaluate");

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.get("n") == Some(&Term::integer(3))));
        let keys: Vec<_> = rows.iter().filter_map(|r| r.get("k").cloned()).collect();
        assert_eq!(keys, vec![Term::integer(1), Term::integer(2)]);
        assert_eq!(engine.context().cache().builds(), 1);
    }
}
