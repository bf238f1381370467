//! # Primitives
//!
//! Fixed vocabulary and runtime limits of the control plane.
//!
//! These constants are compiled into the binary. Limits that a host may want
//! to tune are mirrored by `EngineSettings`, which uses these values as its
//! defaults.

// =============================================================================
// RESERVED LOCATOR SCHEME
// =============================================================================

/// Endpoint prefix that marks a `SERVICE` call as a materialization request.
pub const SCHEME_PREFIX: &str = "x-quarry:";

// =============================================================================
// VOCABULARY
// =============================================================================

/// Namespace of the quarry vocabulary (configuration predicates, root type,
/// audit terms).
pub const QUARRY_NS: &str = "https://w3id.org/quarry/ns#";

/// Namespace of the session functions.
pub const QUARRY_FN_NS: &str = "https://w3id.org/quarry/fn#";

/// Default namespace for named edges derived from source field names.
pub const DEFAULT_DATA_NS: &str = "https://w3id.org/quarry/data/";

/// Reserved subject of in-pattern configuration triples.
pub const CONFIG_SUBJECT: &str = "https://w3id.org/quarry/ns#properties";

/// Type given to the root resource of every materialized document.
pub const ROOT_TYPE: &str = "https://w3id.org/quarry/ns#root";

/// Named graph that receives audit quads.
pub const AUDIT_GRAPH: &str = "https://w3id.org/quarry/ns#audit";

/// Audit predicate carrying the number of quads of a produced graph.
pub const AUDIT_TRIPLES: &str = "https://w3id.org/quarry/ns#triples";

/// Stand-in subject for the default graph in audit quads.
pub const AUDIT_DEFAULT_GRAPH: &str = "https://w3id.org/quarry/ns#defaultGraph";

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";

// =============================================================================
// CONFIGURATION KEYS
// =============================================================================

pub const KEY_LOCATION: &str = "location";
pub const KEY_CONTENT: &str = "content";
pub const KEY_MEDIA_TYPE: &str = "media-type";
pub const KEY_FROM_ARCHIVE: &str = "from-archive";
pub const KEY_ONDISK: &str = "ondisk";
pub const KEY_ONDISK_REUSE: &str = "ondisk.reuse";
pub const KEY_AUDIT: &str = "audit";
pub const KEY_BLANK_NODES: &str = "blank-nodes";
pub const KEY_ROOT: &str = "root";
pub const KEY_ROOT_TYPE: &str = "root-type";
pub const KEY_NAMESPACE: &str = "namespace";
pub const KEY_NULL_STRING: &str = "null-string";
pub const KEY_TRIM_STRINGS: &str = "trim-strings";
pub const KEY_COERCE_TYPES: &str = "coerce-types";
pub const KEY_SLICE: &str = "slice";
pub const KEY_CHARSET: &str = "charset";
pub const KEY_ARCHIVE_MATCHES: &str = "archive.matches";
pub const KEY_TXT_SPLIT: &str = "txt.split";
pub const KEY_TXT_REGEX: &str = "txt.regex";

/// Keys that accumulate every declared value instead of last-write-wins.
pub const MULTI_VALUED_KEYS: &[&str] = &["txt.regex", "json.path", "xml.path", "html.selector"];

/// Keys whose value must parse as a boolean.
pub const BOOLEAN_KEYS: &[&str] = &[
    KEY_ONDISK_REUSE,
    KEY_AUDIT,
    KEY_BLANK_NODES,
    KEY_ROOT_TYPE,
    KEY_TRIM_STRINGS,
    KEY_COERCE_TYPES,
    KEY_SLICE,
];

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum number of cached materializations kept in memory.
pub const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Time-to-live of an in-memory cache entry, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Maximum depth of nested reserved-scheme calls.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Maximum number of quads a single materialization may emit.
///
/// Guards against pathological sources that would otherwise never finish.
pub const MAX_QUADS_PER_MATERIALIZATION: u64 = 50_000_000;

/// Bound of the channel between a streaming producer and its consumer.
pub const STREAM_BUFFER: usize = 1024;

/// Bytes inspected when sniffing the media type of a source.
pub const SNIFF_WINDOW: usize = 512;

// =============================================================================
// DURABLE STORE
// =============================================================================

/// File name of the durable store inside an `ondisk` directory.
pub const DURABLE_FILE_NAME: &str = "quarry.redb";

/// Format version written into the durable store metadata.
///
/// Increment this when making breaking changes to the stored quad encoding.
pub const DURABLE_FORMAT_VERSION: u64 = 1;
