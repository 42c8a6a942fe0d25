// ── Mnemo Atoms: Core Types ────────────────────────────────────────────────
// Typed records for the three-layer memory system. The dynamic maps of the
// block file format are parsed into these structs; unknown frontmatter keys
// ride along in `extra` so files round-trip faithfully.
//
// Dependency rule: this module depends only on std + pure crates. No I/O.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Knowledge Blocks
// ═══════════════════════════════════════════════════════════════════════════

/// Classification of how volatile a block's content is. Descriptive metadata
/// only — no ingest path rejects any type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InformationType {
    #[default]
    #[serde(rename = "static")]
    Static,
    #[serde(rename = "semi-static")]
    SemiStatic,
    #[serde(rename = "dynamic")]
    Dynamic,
    #[serde(rename = "ephemeral")]
    Ephemeral,
}

impl InformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InformationType::Static => "static",
            InformationType::SemiStatic => "semi-static",
            InformationType::Dynamic => "dynamic",
            InformationType::Ephemeral => "ephemeral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(InformationType::Static),
            "semi-static" | "semi_static" => Some(InformationType::SemiStatic),
            "dynamic" => Some(InformationType::Dynamic),
            "ephemeral" => Some(InformationType::Ephemeral),
            _ => None,
        }
    }
}

/// A scalar (or string-list) frontmatter value. Unknown keys are preserved
/// as these so a read-modify-write cycle never loses caller metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrontValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl FrontValue {
    /// Render as a single-line frontmatter scalar (lists are handled by the
    /// writer separately).
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            FrontValue::Bool(b) => Some(b.to_string()),
            FrontValue::Int(i) => Some(i.to_string()),
            FrontValue::Float(f) => Some(f.to_string()),
            FrontValue::Str(s) => Some(s.clone()),
            FrontValue::List(_) => None,
        }
    }
}

/// The atomic unit of knowledge: a titled body of text plus lifecycle
/// metadata, persisted as one frontmatter+body file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBlock {
    /// Stable opaque id, immutable for the block's lifetime.
    pub id: String,
    pub title: String,
    /// Free text. The primary semantic payload.
    pub body: String,
    /// Lowercase tags, kept sorted and deduplicated.
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 over body + normalised identity frontmatter. Access metadata
    /// and timestamps are excluded so reads never perturb it.
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub information_type: InformationType,
    #[serde(default)]
    pub archived: bool,
    /// Unknown frontmatter keys, preserved verbatim through read/write.
    #[serde(default)]
    pub extra: BTreeMap<String, FrontValue>,
}

impl KnowledgeBlock {
    /// Build a fresh block with lifecycle metadata initialised to `now`.
    /// Tags are lowercased, sorted, and deduplicated.
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        KnowledgeBlock {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            content_hash: String::new(),
            access_count: 0,
            last_access: now,
            information_type: InformationType::default(),
            archived: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.set_tags(tags);
        self
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        let mut tags: Vec<String> = tags.into_iter().map(|t| t.to_lowercase()).collect();
        tags.sort();
        tags.dedup();
        self.tags = tags;
    }

    /// First `max_chars` characters of the body, cut at a char boundary.
    pub fn body_prefix(&self, max_chars: usize) -> &str {
        if self.body.len() <= max_chars {
            return &self.body;
        }
        let mut end = max_chars;
        while end > 0 && !self.body.is_char_boundary(end) {
            end -= 1;
        }
        &self.body[..end]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Relationships
// ═══════════════════════════════════════════════════════════════════════════

/// Where a relationship came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationOrigin {
    /// Created through the public `link` operation.
    Explicit,
    /// Created by an automatic linking pass during ingest.
    Autolink,
    /// Proposed by the reasoning model and accepted by the reflector.
    Reflection,
}

impl RelationOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationOrigin::Explicit => "explicit",
            RelationOrigin::Autolink => "autolink",
            RelationOrigin::Reflection => "reflection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(RelationOrigin::Explicit),
            "autolink" => Some(RelationOrigin::Autolink),
            "reflection" => Some(RelationOrigin::Reflection),
            _ => None,
        }
    }
}

/// A directed, typed edge between two blocks. Identity is
/// `(source_id, target_id, kind)`; edges are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    /// Free string from a conventional vocabulary: `related_to`,
    /// `references`, `extends`, …
    pub kind: String,
    /// Optional strength in [0, 1].
    pub weight: Option<f64>,
    pub origin: RelationOrigin,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: impl Into<String>,
        weight: Option<f64>,
        origin: RelationOrigin,
    ) -> Self {
        Relationship {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind: kind.into(),
            weight,
            origin,
            created_at: Utc::now(),
        }
    }

    /// The identity triple.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.source_id, &self.target_id, &self.kind)
    }
}

/// Neighbour query direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
    Both,
}

// ═══════════════════════════════════════════════════════════════════════════
// Vector Index
// ═══════════════════════════════════════════════════════════════════════════

/// Block fields projected into the vector index for sparse-signal scoring
/// and encode-cache checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub information_type: InformationType,
    pub content_hash: String,
}

impl VectorMetadata {
    pub fn from_block(block: &KnowledgeBlock) -> Self {
        VectorMetadata {
            title: block.title.clone(),
            tags: block.tags.clone(),
            information_type: block.information_type,
            content_hash: block.content_hash.clone(),
        }
    }
}

/// One nearest-neighbour match from the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub block_id: String,
    /// Cosine similarity in [-1, 1].
    pub similarity: f64,
    pub metadata: VectorMetadata,
}

/// Optional metadata predicate for vector queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub information_type: Option<InformationType>,
    /// Require this tag to be present.
    pub tag: Option<String>,
}

impl MetadataFilter {
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        if let Some(it) = self.information_type {
            if metadata.information_type != it {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !metadata.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Retrieval
// ═══════════════════════════════════════════════════════════════════════════

/// Which ranking the retriever uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Cosine similarity plus sparse boosts (the cosine term dominates).
    #[default]
    Dense,
    /// Reciprocal Rank Fusion of the dense and sparse rankings.
    Rrf,
}

/// Caller-facing knobs for one retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Terms that add a fixed boost when they match a candidate.
    #[serde(default)]
    pub boost: Vec<String>,
    /// Terms that disqualify a candidate on a whole-word match.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub mode: RetrievalMode,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            top_k: crate::atoms::constants::DEFAULT_TOP_K,
            boost: Vec::new(),
            exclude: Vec::new(),
            mode: RetrievalMode::Dense,
        }
    }
}

/// Machine-readable trace of how a result earned its score. Everything an
/// `--explain` surface needs, nothing a human has to re-derive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Explanation {
    /// Raw cosine similarity.
    pub semantic: f64,
    /// Sum of keyword boosts (query-term hits + user boosts).
    pub sparse: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub title_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub body_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tag_terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub boost_terms: Vec<String>,
    /// 1-based rank in the dense (cosine) ordering, when RRF was applied.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dense_rank: Option<usize>,
    /// 1-based rank in the sparse ordering, when RRF was applied and the
    /// candidate had a sparse score above zero.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sparse_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rrf_score: Option<f64>,
}

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub block_id: String,
    pub title: String,
    /// The ranking score: cosine + sparse in dense mode, the fused RRF
    /// score in rrf mode.
    pub score: f64,
    pub cosine_similarity: f64,
    pub sparse_score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub matched_boosts: Vec<String>,
    pub reason: Explanation,
}

/// Retrieval envelope. `degraded` is set when a backend fell back to its
/// in-memory substitute for this engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<SearchResult>,
    pub degraded: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Context Materialisation
// ═══════════════════════════════════════════════════════════════════════════

/// A token-bounded context assembled for a goal, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedContext {
    pub text: String,
    /// Source blocks that contributed (directly or through compression).
    pub block_ids: Vec<String>,
    pub token_count: usize,
    pub max_tokens: usize,
    /// True when the compressor had to run to meet the budget.
    pub compressed: bool,
}

impl MaterializedContext {
    pub fn empty(max_tokens: usize) -> Self {
        MaterializedContext {
            text: String::new(),
            block_ids: Vec::new(),
            token_count: 0,
            max_tokens,
            compressed: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Decay
// ═══════════════════════════════════════════════════════════════════════════

/// Which archival condition the decay pass evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayPolicy {
    /// Archive when `now - last_access` exceeds the day threshold.
    Time,
    /// Archive when the block's share of total accesses is under the ratio.
    Usage,
    /// Archive when either condition holds.
    Both,
}

/// Per-invocation overrides for the decay thresholds. `None` falls back to
/// the configured defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecayParams {
    pub time_threshold_days: Option<i64>,
    pub usage_threshold: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Which provider backs a graph/vector store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local, non-persistent. Also the fallback when a persistent
    /// backend cannot be opened.
    #[default]
    Memory,
    /// SQLite database at the given path.
    Sqlite(PathBuf),
}

/// Embedding provider endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Base URL of an Ollama or OpenAI-compatible embedding service.
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embed_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embed_timeout_ms() -> u64 {
    crate::atoms::constants::DEFAULT_EMBED_TIMEOUT_MS
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            api_key: None,
            timeout_ms: default_embed_timeout_ms(),
        }
    }
}

/// Reasoning-model endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_reason_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_reason_timeout_ms() -> u64 {
    crate::atoms::constants::DEFAULT_REASON_TIMEOUT_MS
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        ReasonerConfig {
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.1".into(),
            api_key: None,
            temperature: None,
            timeout_ms: default_reason_timeout_ms(),
        }
    }
}

/// Backend provider selectors. Missing vector/graph backends mean the
/// in-memory fallbacks; a missing embedder makes encode/retrieve fail fast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub vector: BackendKind,
    #[serde(default)]
    pub graph: BackendKind,
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
    #[serde(default)]
    pub reasoner: Option<ReasonerConfig>,
}

/// Retrieval scoring knobs. Defaults are the authoritative contract values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Added once when any query term whole-word matches the title.
    pub title_boost: f64,
    /// Added once when any query term whole-word matches the body.
    pub body_boost: f64,
    /// Added once when any query term whole-word matches a tag.
    pub tag_boost: f64,
    /// Added once per matching user-supplied boost term.
    pub user_boost: f64,
    pub rrf_k: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        use crate::atoms::constants::*;
        RetrievalConfig {
            default_top_k: DEFAULT_TOP_K,
            title_boost: TITLE_BOOST,
            body_boost: BODY_BOOST,
            tag_boost: TAG_BOOST,
            user_boost: USER_BOOST,
            rrf_k: RRF_K,
        }
    }
}

/// Decay policy defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    pub time_threshold_days: i64,
    pub usage_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        use crate::atoms::constants::*;
        DecayConfig {
            time_threshold_days: DECAY_TIME_THRESHOLD_DAYS,
            usage_threshold: DECAY_USAGE_THRESHOLD,
        }
    }
}

/// Compression knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Regex locating sentence ends for truncation. Implementation-defined
    /// but stable across releases — truncation points must not drift.
    pub sentence_boundary_pattern: String,
    pub default_max_tokens: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        use crate::atoms::constants::*;
        CompressionConfig {
            sentence_boundary_pattern: SENTENCE_BOUNDARY_PATTERN.to_string(),
            default_max_tokens: DEFAULT_COMPRESS_MAX_TOKENS,
        }
    }
}

/// Process-wide configuration, initialised once at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Filesystem root for block files. Required.
    pub block_dir: PathBuf,
    /// Archive location, relative to `block_dir`.
    pub archive_dir: PathBuf,
    /// Embedding dimension, fixed for the lifetime of a catalogue. Changing
    /// it requires a full reindex.
    pub embedding_dim: usize,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl MemoryConfig {
    /// Defaults rooted at `block_dir`: in-memory backends, no external
    /// models, contract scoring constants.
    pub fn new(block_dir: impl Into<PathBuf>) -> Self {
        MemoryConfig {
            block_dir: block_dir.into(),
            archive_dir: PathBuf::from(crate::atoms::constants::DEFAULT_ARCHIVE_DIR),
            embedding_dim: crate::atoms::constants::DEFAULT_EMBEDDING_DIM,
            retrieval: RetrievalConfig::default(),
            decay: DecayConfig::default(),
            compression: CompressionConfig::default(),
            backend: BackendConfig::default(),
        }
    }

    /// Absolute path of the archive directory.
    pub fn archive_path(&self) -> PathBuf {
        self.block_dir.join(&self.archive_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_type_round_trip() {
        for it in [
            InformationType::Static,
            InformationType::SemiStatic,
            InformationType::Dynamic,
            InformationType::Ephemeral,
        ] {
            assert_eq!(InformationType::parse(it.as_str()), Some(it));
        }
        assert_eq!(InformationType::parse("volatile"), None);
    }

    #[test]
    fn test_block_tags_normalised() {
        let block = KnowledgeBlock::new("KB-1", "t", "b")
            .with_tags(vec!["Zeta".into(), "alpha".into(), "ALPHA".into()]);
        assert_eq!(block.tags, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_body_prefix_char_boundary() {
        let block = KnowledgeBlock::new("KB-1", "t", "héllo wörld");
        let prefix = block.body_prefix(3);
        assert!(prefix.len() <= 3);
        assert!(block.body.starts_with(prefix));
    }

    #[test]
    fn test_relationship_key() {
        let rel = Relationship::new("a", "b", "extends", Some(0.5), RelationOrigin::Explicit);
        assert_eq!(rel.key(), ("a", "b", "extends"));
    }

    #[test]
    fn test_metadata_filter() {
        let block = KnowledgeBlock::new("KB-1", "t", "b").with_tags(vec!["nad".into()]);
        let meta = VectorMetadata::from_block(&block);

        assert!(MetadataFilter::default().matches(&meta));
        assert!(MetadataFilter { tag: Some("nad".into()), ..Default::default() }.matches(&meta));
        assert!(!MetadataFilter { tag: Some("other".into()), ..Default::default() }.matches(&meta));
        assert!(!MetadataFilter {
            information_type: Some(InformationType::Dynamic),
            ..Default::default()
        }
        .matches(&meta));
    }

    #[test]
    fn test_config_defaults_match_contract() {
        let config = MemoryConfig::new("/tmp/kb");
        assert_eq!(config.retrieval.default_top_k, 5);
        assert!((config.retrieval.title_boost - 0.20).abs() < 1e-9);
        assert!((config.retrieval.body_boost - 0.10).abs() < 1e-9);
        assert!((config.retrieval.tag_boost - 0.10).abs() < 1e-9);
        assert!((config.retrieval.user_boost - 0.15).abs() < 1e-9);
        assert!((config.retrieval.rrf_k - 60.0).abs() < 1e-9);
        assert_eq!(config.decay.time_threshold_days, 180);
        assert!((config.decay.usage_threshold - 0.01).abs() < 1e-9);
        assert_eq!(config.archive_path(), PathBuf::from("/tmp/kb/archive"));
    }

    #[test]
    fn test_search_options_serde() {
        let opts = SearchOptions { mode: RetrievalMode::Rrf, ..Default::default() };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"rrf\""));
        let back: SearchOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, RetrievalMode::Rrf);
        assert_eq!(back.top_k, 5);
    }
}
