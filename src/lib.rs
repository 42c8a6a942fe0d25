//! # mnemo — hybrid knowledge memory core
//!
//! A three-layer memory system for AI agents and tools: knowledge blocks
//! live as frontmatter+body files (the durable source of truth), explicit
//! relationships live in a typed graph, and a cosine vector index serves
//! semantic recall. One engine — [`MemoryCore`] — orchestrates the layers
//! and keeps them consistent.
//!
//! Operations:
//!
//! - `record` / `encode` — ingest text, index its embedding
//! - `retrieve` — hybrid search: dense similarity + sparse keyword boosts,
//!   exclusion filters, and optional Reciprocal Rank Fusion
//! - `link` / `reflect` — explicit and model-proposed typed relationships
//! - `materialize_context` / `compress` — token-budgeted context assembly
//!   with map-reduce summarisation
//! - `decay` / `restore` — lifecycle archival driven by access metadata
//! - `reindex_all` / `reset_vectors` — catalogue-wide index rebuilds
//!
//! ```no_run
//! use std::sync::Arc;
//! use mnemo::{MemoryConfig, MemoryCore, RecordMeta, SearchOptions};
//! use mnemo::engine::HttpEmbeddingClient;
//! use mnemo::atoms::types::EmbedderConfig;
//!
//! # async fn demo() -> mnemo::MemoryResult<()> {
//! let config = MemoryConfig::new("./knowledge");
//! let embedder = HttpEmbeddingClient::new(&EmbedderConfig::default());
//! let core = MemoryCore::open(config)?.with_embedder(Arc::new(embedder));
//!
//! let id = core.record("NMN is a precursor of NAD.", RecordMeta::default())?;
//! core.encode(&id).await?;
//! let hits = core.retrieve("what boosts NAD", &SearchOptions::default()).await?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```
//!
//! External collaborators (embedding provider, reasoning model, token
//! counter, persistent graph/vector backends) are capabilities behind
//! traits; each persistent store ships with an in-memory fallback the
//! engine selects automatically when a backend is unreachable.

pub mod atoms;
pub mod engine;

pub use atoms::error::{MemoryError, MemoryResult};
pub use atoms::types::{
    DecayParams, DecayPolicy, Direction, InformationType, KnowledgeBlock, MaterializedContext,
    MemoryConfig, RelationOrigin, Relationship, RetrievalMode, RetrievalResponse, SearchOptions,
    SearchResult,
};
pub use engine::{MemoryCore, RecordMeta};
