//! # CLI Command Implementations
//!
//! Commands write to the supplied writer so they can be exercised without a
//! terminal; `execute` hands them a locked stdout.

use quarry_core::functions::FUNCTION_NAMES;
use quarry_core::primitives::{KEY_SLICE, QUARRY_FN_NS};
use quarry_core::{Engine, EngineContext, EngineSettings, GraphCounts, QuarryError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

fn write_err(e: std::io::Error) -> QuarryError {
    QuarryError::IoError(format!("Cannot write output: {}", e))
}

fn print_json(out: &mut dyn Write, value: &impl Serialize) -> Result<(), QuarryError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| QuarryError::SerializationError(e.to_string()))?;
    writeln!(out, "{}", text).map_err(write_err)
}

/// An engine with the built-in materializers and the given limits.
pub fn build_engine(settings: EngineSettings) -> Engine {
    Engine::new(Arc::new(EngineContext::new(settings)))
}

// =============================================================================
// MATERIALIZE COMMAND
// =============================================================================

/// Summary printed by `materialize --json`.
#[derive(Debug, Serialize)]
pub struct MaterializeReport {
    pub fingerprint: String,
    pub quads: u64,
    /// Quads per graph; the default graph is keyed `default`.
    pub graphs: BTreeMap<String, u64>,
    pub streamed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_path: Option<String>,
}

impl MaterializeReport {
    fn new(fingerprint: String, counts: &GraphCounts, streamed: bool) -> Self {
        let graphs = counts
            .iter()
            .map(|(graph, n)| (graph.map_or_else(|| "default".to_string(), |g| g.to_string()), n))
            .collect();
        Self {
            fingerprint,
            quads: counts.total(),
            graphs,
            streamed,
            durable_path: None,
        }
    }
}

/// Materialize a locator; `slice=true` streams instead of collecting.
pub fn cmd_materialize(
    engine: &Engine,
    locator: &str,
    json_mode: bool,
    out: &mut dyn Write,
) -> Result<(), QuarryError> {
    let config = engine.configuration(locator)?;
    let fingerprint = config.fingerprint().to_hex();

    if config.flag(KEY_SLICE, false) {
        let mut stream = engine.stream(&config)?;
        for quad in stream.by_ref() {
            let quad = quad?;
            if !json_mode {
                writeln!(out, "{}", quad).map_err(write_err)?;
            }
        }
        if json_mode {
            let counts = stream.counts().cloned().unwrap_or_default();
            print_json(out, &MaterializeReport::new(fingerprint, &counts, true))?;
        }
        return Ok(());
    }

    let materialized = engine.materialize(&config)?;
    tracing::info!(
        fingerprint = %materialized.fingerprint,
        quads = materialized.graph.len(),
        "materialized"
    );

    if json_mode {
        let mut report = MaterializeReport::new(fingerprint, &materialized.counts, false);
        report.durable_path = materialized
            .durable_path
            .as_ref()
            .map(|p| p.display().to_string());
        return print_json(out, &report);
    }

    out.write_all(materialized.graph.to_nquads().as_bytes())
        .map_err(write_err)
}

// =============================================================================
// FINGERPRINT COMMAND
// =============================================================================

/// Show the normalized options of a locator and their fingerprint.
pub fn cmd_fingerprint(
    engine: &Engine,
    locator: &str,
    json_mode: bool,
    out: &mut dyn Write,
) -> Result<(), QuarryError> {
    let config = engine.configuration(locator)?;
    let fingerprint = config.fingerprint().to_hex();

    if json_mode {
        let options: BTreeMap<&str, &[String]> = config.iter().collect();
        let output = serde_json::json!({
            "locator": config.to_locator(),
            "options": options,
            "fingerprint": fingerprint,
        });
        return print_json(out, &output);
    }

    writeln!(out, "Options").map_err(write_err)?;
    writeln!(out, "=======").map_err(write_err)?;
    for (key, values) in config.iter() {
        writeln!(out, "  {} = {}", key, values.join(" | ")).map_err(write_err)?;
    }
    writeln!(out).map_err(write_err)?;
    writeln!(out, "Locator:     {}", config.to_locator()).map_err(write_err)?;
    writeln!(out, "Fingerprint: {}", fingerprint).map_err(write_err)
}

// =============================================================================
// FORMATS COMMAND
// =============================================================================

/// List the registered materializers.
pub fn cmd_formats(engine: &Engine, json_mode: bool, out: &mut dyn Write) -> Result<(), QuarryError> {
    let formats = engine.context().registry().formats();

    if json_mode {
        return print_json(out, &formats);
    }

    for info in &formats {
        writeln!(
            out,
            "{:<10} extensions: {:<16} media types: {}",
            info.name,
            info.extensions.join(", "),
            info.media_types.join(", ")
        )
        .map_err(write_err)?;
    }
    Ok(())
}

// =============================================================================
// FUNCTIONS COMMAND
// =============================================================================

/// List the helper functions a host can bind, with their full IRIs.
pub fn cmd_functions(json_mode: bool, out: &mut dyn Write) -> Result<(), QuarryError> {
    if json_mode {
        let functions: BTreeMap<&str, String> = FUNCTION_NAMES
            .iter()
            .map(|name| (*name, format!("{}{}", QUARRY_FN_NS, name)))
            .collect();
        return print_json(out, &functions);
    }

    for name in FUNCTION_NAMES {
        writeln!(out, "{:<36} <{}{}>", name, QUARRY_FN_NS, name).map_err(write_err)?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run(f: impl FnOnce(&Engine, &mut dyn Write) -> Result<(), QuarryError>) -> String {
        let engine = build_engine(EngineSettings::default());
        let mut out = Vec::new();
        f(&engine, &mut out).expect("command");
        String::from_utf8(out).expect("utf-8")
    }

    #[test]
    fn materialize_prints_nquads() {
        let text = run(|e, out| cmd_materialize(e, "x-quarry:content=a\\,b,txt.split=\\,", false, out));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.ends_with(" .")));
    }

    #[test]
    fn materialize_json_counts() {
        let text = run(|e, out| cmd_materialize(e, "x-quarry:content=a\\,b,txt.split=\\,", true, out));
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["quads"], 3);
        assert_eq!(value["graphs"]["default"], 3);
        assert_eq!(value["streamed"], false);
    }

    #[test]
    fn materialize_streams_when_sliced() {
        let text = run(|e, out| {
            cmd_materialize(e, "x-quarry:content=a\\,b\\,c,txt.split=\\,,slice=true", true, out)
        });
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["quads"], 4);
        assert_eq!(value["streamed"], true);
    }

    #[test]
    fn materialize_reports_errors() {
        let engine = build_engine(EngineSettings::default());
        let mut out = Vec::new();
        let result = cmd_materialize(&engine, "x-quarry:", false, &mut out);
        assert_eq!(result, Err(QuarryError::MissingLocation));
        assert!(out.is_empty());
    }

    #[test]
    fn fingerprint_ignores_option_order() {
        let a = run(|e, out| cmd_fingerprint(e, "x-quarry:location=a.txt,root=http://ex.org/", false, out));
        let b = run(|e, out| cmd_fingerprint(e, "x-quarry:root=http://ex.org/,location=a.txt", false, out));
        assert_eq!(a, b);
        assert!(a.contains("location = a.txt"));
    }

    #[test]
    fn fingerprint_json() {
        let text = run(|e, out| cmd_fingerprint(e, "x-quarry:location=a.txt", true, out));
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["options"]["location"][0], "a.txt");
        assert_eq!(value["fingerprint"].as_str().map(str::len), Some(64));
    }

    #[test]
    fn formats_lists_builtins() {
        let text = run(|e, out| cmd_formats(e, false, out));
        assert!(text.contains("text"));
        assert!(text.contains("archive"));

        let json = run(|e, out| cmd_formats(e, true, out));
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn functions_lists_every_helper() {
        let text = run(|_, out| cmd_functions(false, out));
        assert_eq!(text.lines().count(), FUNCTION_NAMES.len());
        assert!(text.contains("<https://w3id.org/quarry/fn#serial>"));

        let json = run(|_, out| cmd_functions(true, out));
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["sha256"], "https://w3id.org/quarry/fn#sha256");
    }
}
