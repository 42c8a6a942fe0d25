// ── Context Builder ────────────────────────────────────────────────────────
//
// Budget-aware context assembly: pick the blocks relevant to a goal, order
// them by retrieval rank, and emit a body of text guaranteed to fit a token
// budget, with provenance for every contributing block.
//
// Selection is retrieval (top `default_top_k`); the budget decides the
// emission path. When every selected block fits under the budget the output
// is the plain headed concatenation; when it does not, the whole selected
// set goes to the compressor so low-ranked but relevant blocks still shape
// the summary.
//
// Guarantees: output token count ≤ `max_tokens`; output is empty iff
// retrieval found nothing.

use log::{info, warn};

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{KnowledgeBlock, MaterializedContext, RetrievalConfig, SearchOptions};
use crate::engine::blocks::BlockStore;
use crate::engine::compress::Compressor;
use crate::engine::embedding::Embedder;
use crate::engine::retriever;
use crate::engine::tokenizer::TokenCounter;
use crate::engine::vector::VectorStore;

/// Per-block header carrying title and provenance id.
fn section_header(block: &KnowledgeBlock) -> String {
    format!("## {} [{}]\n\n", block.title, block.id)
}

/// Assemble a context for `goal` within `max_tokens`.
#[allow(clippy::too_many_arguments)]
pub async fn materialize(
    blocks: &BlockStore,
    vectors: &dyn VectorStore,
    embedder: &dyn Embedder,
    compressor: &Compressor,
    counter: &dyn TokenCounter,
    goal: &str,
    max_tokens: usize,
    config: &RetrievalConfig,
) -> MemoryResult<MaterializedContext> {
    if max_tokens == 0 {
        return Err(MemoryError::invalid("max_tokens must be positive"));
    }

    let opts = SearchOptions { top_k: config.default_top_k, ..Default::default() };
    let results = retriever::search(blocks, vectors, embedder, goal, &opts, config).await?;
    if results.is_empty() {
        info!("[context] No relevant blocks for goal, returning empty context");
        return Ok(MaterializedContext::empty(max_tokens));
    }

    // Load the selected blocks in result order. A result whose file has
    // gone unreadable since ranking is dropped, not fatal.
    let mut selected: Vec<KnowledgeBlock> = Vec::with_capacity(results.len());
    for result in &results {
        match blocks.read(&result.block_id) {
            Ok(block) => selected.push(block),
            Err(e) => warn!("[context] Skipping {}: {}", result.block_id, e),
        }
    }
    if selected.is_empty() {
        return Ok(MaterializedContext::empty(max_tokens));
    }

    // Greedy accumulation in rank order: does the whole selection fit?
    let mut assembled = String::new();
    let mut fitted = 0usize;
    for block in &selected {
        let section = format!("{}{}\n\n", section_header(block), block.body);
        let candidate_tokens =
            counter.count_tokens(&assembled) + counter.count_tokens(&section);
        if candidate_tokens > max_tokens {
            break;
        }
        assembled.push_str(&section);
        fitted += 1;
    }

    if fitted == selected.len() {
        let text = assembled.trim_end().to_string();
        let token_count = counter.count_tokens(&text);
        let block_ids: Vec<String> = selected.iter().map(|b| b.id.clone()).collect();
        info!(
            "[context] Assembled {} blocks directly ({} / {} tokens)",
            block_ids.len(),
            token_count,
            max_tokens
        );
        return Ok(MaterializedContext {
            text,
            block_ids,
            token_count,
            max_tokens,
            compressed: false,
        });
    }

    // Over budget: compress the full selected set down to the target.
    let block_ids: Vec<String> = selected.iter().map(|b| b.id.clone()).collect();
    let text = compressor.compress(&selected, max_tokens).await?;
    let token_count = counter.count_tokens(&text);
    info!(
        "[context] Compressed {} blocks into {} / {} tokens",
        block_ids.len(),
        token_count,
        max_tokens
    );
    Ok(MaterializedContext { text, block_ids, token_count, max_tokens, compressed: true })
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
