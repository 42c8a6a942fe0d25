// ── Memory Core ────────────────────────────────────────────────────────────
//
// The orchestrator over the three layers:
//
//   BlockStore   — durable source of truth (frontmatter files)
//   GraphStore   — explicit typed relationships (derivative)
//   VectorStore  — semantic index (derivative, rebuildable via reindex_all)
//
// plus the external adapters (embedder, reasoner, token counter). All
// public operations live here; cross-store invariants are enforced at
// these boundaries:
//
//   - a VectorEntry exists only for a live, encoded block
//   - archived blocks are invisible to retrieval and reflection
//   - relationships reference live blocks at creation time and are never
//     duplicated
//
// Writes to one block are serialised by a per-id lock. External calls are
// never awaited while any lock is held — embed first, merge results back
// under the lock.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{
    BackendKind, DecayParams, DecayPolicy, FrontValue, InformationType, KnowledgeBlock,
    MaterializedContext, MemoryConfig, RelationOrigin, Relationship, RetrievalResponse,
    SearchOptions, VectorMetadata,
};
use crate::engine::blocks::BlockStore;
use crate::engine::compress::Compressor;
use crate::engine::context;
use crate::engine::decay;
use crate::engine::embedding::{Embedder, HttpEmbeddingClient};
use crate::engine::graph::{GraphStore, InMemoryGraph, SqliteGraph};
use crate::engine::reasoner::{HttpReasonerClient, Reasoner};
use crate::engine::reflect;
use crate::engine::retriever;
use crate::engine::tokenizer::{TokenCounter, Tokenizer};
use crate::engine::vector::{l2_normalize, InMemoryVectorIndex, SqliteVectorIndex, VectorStore};

/// Caller-supplied frontmatter for `record`. Everything is optional; the
/// engine fills in id, timestamps, and defaults.
#[derive(Debug, Clone, Default)]
pub struct RecordMeta {
    pub id: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub information_type: Option<InformationType>,
    /// Preserved verbatim in the block's frontmatter.
    pub extra: std::collections::BTreeMap<String, FrontValue>,
}

pub struct MemoryCore {
    config: MemoryConfig,
    blocks: BlockStore,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    reasoner: Option<Arc<dyn Reasoner>>,
    counter: Arc<dyn TokenCounter>,
    compressor: Compressor,
    /// True when a configured persistent backend could not be opened and an
    /// in-memory fallback took its place.
    degraded: bool,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryCore {
    /// Construct an engine from configuration. Persistent backends that
    /// fail to open degrade to their in-memory fallbacks with a warning;
    /// the embedder and reasoner are built from config when present.
    pub fn open(config: MemoryConfig) -> MemoryResult<Self> {
        let blocks = BlockStore::open(&config.block_dir, config.archive_path())?;

        let (graph, graph_degraded): (Arc<dyn GraphStore>, bool) = match &config.backend.graph {
            BackendKind::Memory => (Arc::new(InMemoryGraph::new()), false),
            BackendKind::Sqlite(path) => match SqliteGraph::open(path) {
                Ok(store) => (Arc::new(store), false),
                Err(e) => {
                    warn!("[core] Graph backend unavailable ({}), degrading to in-memory", e);
                    (Arc::new(InMemoryGraph::new()), true)
                }
            },
        };

        let (vectors, vector_degraded): (Arc<dyn VectorStore>, bool) = match &config.backend.vector {
            BackendKind::Memory => (Arc::new(InMemoryVectorIndex::new()), false),
            BackendKind::Sqlite(path) => match SqliteVectorIndex::open(path) {
                Ok(store) => (Arc::new(store), false),
                Err(e) => {
                    warn!("[core] Vector backend unavailable ({}), degrading to in-memory", e);
                    (Arc::new(InMemoryVectorIndex::new()), true)
                }
            },
        };

        let embedder: Option<Arc<dyn Embedder>> = config
            .backend
            .embedder
            .as_ref()
            .map(|c| Arc::new(HttpEmbeddingClient::new(c)) as Arc<dyn Embedder>);
        let reasoner: Option<Arc<dyn Reasoner>> = config
            .backend
            .reasoner
            .as_ref()
            .map(|c| Arc::new(HttpReasonerClient::new(c)) as Arc<dyn Reasoner>);

        let counter: Arc<dyn TokenCounter> = Arc::new(Tokenizer::heuristic());
        let mut compressor = Compressor::new(counter.clone(), &config.compression)?;
        if let Some(ref r) = reasoner {
            compressor = compressor.with_reasoner(r.clone());
        }

        Ok(MemoryCore {
            config,
            blocks,
            graph,
            vectors,
            embedder,
            reasoner,
            counter,
            compressor,
            degraded: graph_degraded || vector_degraded,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the embedder (e.g. with a local model adapter).
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the reasoner; the compressor picks it up as well.
    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> MemoryResult<Self> {
        self.reasoner = Some(reasoner.clone());
        self.compressor = Compressor::new(self.counter.clone(), &self.config.compression)?
            .with_reasoner(reasoner);
        Ok(self)
    }

    /// Replace the token counter used for all budget arithmetic.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> MemoryResult<Self> {
        self.counter = counter.clone();
        let mut compressor = Compressor::new(counter, &self.config.compression)?;
        if let Some(ref r) = self.reasoner {
            compressor = compressor.with_reasoner(r.clone());
        }
        self.compressor = compressor;
        Ok(self)
    }

    /// Whether any persistent backend fell back to its in-memory substitute.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn require_embedder(&self) -> MemoryResult<&Arc<dyn Embedder>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("no embedder configured".into()))
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock();
        locks.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Record / Encode / Link
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a block from raw text and optional frontmatter. Returns the
    /// block id. Does not encode — call `encode` (or `reindex_all`) to make
    /// the block retrievable.
    pub fn record(&self, text: &str, meta: RecordMeta) -> MemoryResult<String> {
        if text.trim().is_empty() {
            return Err(MemoryError::invalid("block body must not be empty"));
        }

        let id = match meta.id {
            Some(id) => {
                if self.blocks.exists(&id) || self.blocks.exists_archived(&id) {
                    return Err(MemoryError::already_exists(id));
                }
                id
            }
            None => self.blocks.generate_id()?,
        };

        let mut block = KnowledgeBlock::new(&id, meta.title.unwrap_or_else(|| "Untitled".into()), text)
            .with_tags(meta.tags);
        if let Some(it) = meta.information_type {
            block.information_type = it;
        }
        block.extra = meta.extra;

        let lock = self.id_lock(&id);
        let _guard = lock.lock();
        self.blocks.write(&mut block)?;
        info!("[core] Recorded block {}", id);
        Ok(id)
    }

    /// Compute and store the block's embedding. Idempotent while the
    /// content hash is unchanged: the existing entry (and its exact vector)
    /// is kept without a new embedder call.
    pub async fn encode(&self, id: &str) -> MemoryResult<()> {
        let embedder = self.require_embedder()?;
        let block = self.blocks.read(id)?;

        if let Some(existing) = self.vectors.get_metadata(id)? {
            if existing.content_hash == block.content_hash {
                info!("[core] Encode {}: content unchanged, keeping existing entry", id);
                return Ok(());
            }
        }

        // The embedding call happens outside any lock.
        let mut embedding = embedder.embed(&block.body).await?;
        if embedding.len() != self.config.embedding_dim {
            return Err(MemoryError::invalid(format!(
                "embedder produced dimension {} but catalogue is configured for {}",
                embedding.len(),
                self.config.embedding_dim
            )));
        }
        l2_normalize(&mut embedding);

        let lock = self.id_lock(id);
        let _guard = lock.lock();
        self.vectors.upsert(id, &embedding, VectorMetadata::from_block(&block))?;
        info!("[core] Encoded block {}", id);
        Ok(())
    }

    /// Create an explicit relationship. Both endpoints must be live blocks;
    /// self-loops and out-of-range weights are rejected.
    pub fn link(
        &self,
        source: &str,
        target: &str,
        kind: &str,
        weight: Option<f64>,
    ) -> MemoryResult<()> {
        if source == target {
            return Err(MemoryError::invalid(format!("self-loop rejected for {}", source)));
        }
        if kind.trim().is_empty() {
            return Err(MemoryError::invalid("relationship kind must not be empty"));
        }
        if let Some(w) = weight {
            if !(0.0..=1.0).contains(&w) {
                return Err(MemoryError::invalid(format!("weight {} outside [0, 1]", w)));
            }
        }
        // Both reads fail NotFound for archived endpoints as well.
        self.blocks.read(source)?;
        self.blocks.read(target)?;

        let rel = Relationship::new(source, target, kind, weight, RelationOrigin::Explicit);
        self.graph.upsert(&rel)?;
        info!("[core] Linked {} --[{}]--> {}", source, kind, target);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Retrieval / Context
    // ═══════════════════════════════════════════════════════════════════════

    /// Hybrid retrieval. The envelope's `degraded` flag reports whether any
    /// backend is running on its in-memory fallback.
    pub async fn retrieve(&self, query: &str, opts: &SearchOptions) -> MemoryResult<RetrievalResponse> {
        let embedder = self.require_embedder()?;
        let results = retriever::search(
            &self.blocks,
            self.vectors.as_ref(),
            embedder.as_ref(),
            query,
            opts,
            &self.config.retrieval,
        )
        .await?;
        Ok(RetrievalResponse { results, degraded: self.degraded })
    }

    /// Token-bounded context assembly for a goal.
    pub async fn materialize_context(
        &self,
        goal: &str,
        max_tokens: usize,
    ) -> MemoryResult<MaterializedContext> {
        let embedder = self.require_embedder()?;
        context::materialize(
            &self.blocks,
            self.vectors.as_ref(),
            embedder.as_ref(),
            &self.compressor,
            self.counter.as_ref(),
            goal,
            max_tokens,
            &self.config.retrieval,
        )
        .await
    }

    /// Summarise a caller-chosen set of blocks under a token target. Ids
    /// that no longer resolve are skipped with a warning.
    pub async fn compress(&self, ids: &[String], max_tokens: usize) -> MemoryResult<String> {
        let mut selected = Vec::with_capacity(ids.len());
        for id in ids {
            match self.blocks.read(id) {
                Ok(block) => {
                    // A body read through the public surface counts as an
                    // access.
                    self.blocks.record_access(id).ok();
                    selected.push(block);
                }
                Err(e) => warn!("[core] Compress skipping {}: {}", id, e),
            }
        }
        self.compressor.compress(&selected, max_tokens).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reflection / Decay
    // ═══════════════════════════════════════════════════════════════════════

    /// Ask the reasoner for relationships around `id`; returns how many
    /// were persisted.
    pub async fn reflect(&self, id: &str) -> MemoryResult<usize> {
        let embedder = self.require_embedder()?;
        reflect::reflect(
            &self.blocks,
            self.vectors.as_ref(),
            self.graph.as_ref(),
            embedder.as_ref(),
            self.reasoner.as_deref(),
            id,
            &self.config.retrieval,
        )
        .await
    }

    /// Archive cold blocks per `policy`; returns the archived ids.
    pub fn decay(&self, policy: DecayPolicy, params: &DecayParams) -> MemoryResult<Vec<String>> {
        decay::run_decay(&self.blocks, self.vectors.as_ref(), policy, params, &self.config.decay)
    }

    /// Bring an archived block back and re-encode it so it is retrievable
    /// again. Without an embedder the file is restored and indexing waits
    /// for a later `encode`/`reindex_all`.
    pub async fn restore(&self, id: &str) -> MemoryResult<()> {
        {
            let lock = self.id_lock(id);
            let _guard = lock.lock();
            self.blocks.restore_from_archive(id)?;
        }
        info!("[core] Restored block {}", id);
        if self.embedder.is_some() {
            self.encode(id).await?;
        } else {
            warn!("[core] Restored {} without re-encoding (no embedder)", id);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catalogue Maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Ids of all live blocks.
    pub fn list_blocks(&self) -> MemoryResult<Vec<String>> {
        self.blocks.list()
    }

    /// Read one block through the public surface.
    pub fn get_block(&self, id: &str) -> MemoryResult<KnowledgeBlock> {
        self.blocks.read(id)
    }

    /// Relationships touching a block.
    pub fn neighbours(
        &self,
        id: &str,
        direction: crate::atoms::types::Direction,
    ) -> MemoryResult<Vec<Relationship>> {
        self.graph.neighbours(id, direction, None)
    }

    /// Clear the vector collection and re-encode every live block. Returns
    /// the number of blocks encoded.
    pub async fn reindex_all(&self) -> MemoryResult<usize> {
        self.require_embedder()?;
        let ids = self.blocks.list()?;
        self.vectors.reset()?;
        info!("[core] Reindexing {} blocks", ids.len());

        let mut count = 0usize;
        for id in &ids {
            match self.encode(id).await {
                Ok(()) => count += 1,
                Err(e @ MemoryError::EmbeddingUnavailable(_)) | Err(e @ MemoryError::Timeout { .. }) => {
                    // Terminal: without the embedder the rest of the pass
                    // cannot succeed either.
                    return Err(e);
                }
                Err(e) => warn!("[core] Reindex skipping {}: {}", id, e),
            }
        }
        info!("[core] Reindexed {} blocks", count);
        Ok(count)
    }

    /// Clear the vector collection without re-encoding.
    pub fn reset_vectors(&self) -> MemoryResult<()> {
        self.vectors.reset()?;
        info!("[core] Vector collection reset");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
