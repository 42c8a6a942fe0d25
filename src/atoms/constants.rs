// ── Mnemo Atoms: Constants ─────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers and
// keeps the scoring contract auditable in a single screen.

// ── Block identifiers ──────────────────────────────────────────────────────
// Generated ids look like `KB-20260802-003`: prefix, UTC day, then a
// zero-padded per-day counter. The counter scans live and archived files so
// a restore never collides with a newer block.
pub const BLOCK_ID_PREFIX: &str = "KB";
pub const BLOCK_ID_SEQ_WIDTH: usize = 3;

// ── Retrieval scoring ──────────────────────────────────────────────────────
// The sparse-signal contract. Query-term hits add once per field; user boost
// terms add once per term.
pub const TITLE_BOOST: f64 = 0.20;
pub const BODY_BOOST: f64 = 0.10;
pub const TAG_BOOST: f64 = 0.10;
pub const USER_BOOST: f64 = 0.15;

/// RRF constant (k = 60 is standard in the IR literature).
pub const RRF_K: f64 = 60.0;

pub const DEFAULT_TOP_K: usize = 5;

// Dense candidate pool: wide enough that sparse re-scoring and exclusion
// filters still leave `top_k` survivors.
pub const DENSE_CANDIDATE_FACTOR: usize = 4;
pub const DENSE_CANDIDATE_MIN: usize = 20;

// ── Decay ──────────────────────────────────────────────────────────────────
pub const DECAY_TIME_THRESHOLD_DAYS: i64 = 180;
pub const DECAY_USAGE_THRESHOLD: f64 = 0.01;

// ── Reflection ─────────────────────────────────────────────────────────────
/// Candidates gathered from each of the two sources (retrieval, graph).
pub const REFLECT_CANDIDATE_LIMIT: usize = 5;
/// Body prefix length (chars) shown to the reasoning model per candidate.
pub const REFLECT_BODY_PREFIX_CHARS: usize = 500;
/// Body prefix length (chars) used to build the candidate-discovery query.
pub const REFLECT_QUERY_PREFIX_CHARS: usize = 400;

// ── Compression ────────────────────────────────────────────────────────────
/// Sentence ends: terminal punctuation, optional closing quotes/brackets,
/// then whitespace or end of input. Stable — truncation points must not
/// drift between releases.
pub const SENTENCE_BOUNDARY_PATTERN: &str = r#"[.!?][")\]']*(\s+|$)"#;
pub const DEFAULT_COMPRESS_MAX_TOKENS: usize = 4096;

// ── Embeddings ─────────────────────────────────────────────────────────────
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

// ── External call budgets (milliseconds) ───────────────────────────────────
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REASON_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_ARCHIVE_DIR: &str = "archive";
