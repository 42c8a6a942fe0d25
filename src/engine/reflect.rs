// ── Reflector ──────────────────────────────────────────────────────────────
//
// Relationship discovery for one seed block:
//
//   1. Gather candidates — semantic neighbours from retrieval (title +
//      body prefix as the query) unioned with direct graph neighbours.
//   2. Ask the reasoning model for typed relationships as structured JSON.
//   3. Keep only triples that point at actual candidates, drop duplicates,
//      and persist the survivors with `origin = reflection`.
//
// No reasoner means no writes; a reasoner failure is logged and also means
// no writes. The graph is only ever extended with edges whose endpoints
// were verified this pass.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;

use crate::atoms::constants::{
    REFLECT_BODY_PREFIX_CHARS, REFLECT_CANDIDATE_LIMIT, REFLECT_QUERY_PREFIX_CHARS,
};
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{
    Direction, KnowledgeBlock, RelationOrigin, Relationship, RetrievalConfig, SearchOptions,
};
use crate::engine::blocks::BlockStore;
use crate::engine::embedding::Embedder;
use crate::engine::graph::GraphStore;
use crate::engine::reasoner::Reasoner;
use crate::engine::retriever;
use crate::engine::vector::VectorStore;

/// A parsed relationship proposal from the reasoning model.
#[derive(Debug, PartialEq)]
struct ProposedTriple {
    target_id: String,
    kind: String,
    weight: Option<f64>,
}

/// Reflect on `seed_id`; returns the number of relationships persisted.
#[allow(clippy::too_many_arguments)]
pub async fn reflect(
    blocks: &BlockStore,
    vectors: &dyn VectorStore,
    graph: &dyn GraphStore,
    embedder: &dyn Embedder,
    reasoner: Option<&dyn Reasoner>,
    seed_id: &str,
    config: &RetrievalConfig,
) -> MemoryResult<usize> {
    let seed = match blocks.read(seed_id) {
        Ok(seed) => seed,
        Err(MemoryError::NotFound { .. }) if blocks.exists_archived(seed_id) => {
            debug!("[reflect] Seed {} is archived, skipping", seed_id);
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    // ── Candidate discovery ──────────────────────────────────────────────
    let query = format!("{} {}", seed.title, seed.body_prefix(REFLECT_QUERY_PREFIX_CHARS));
    let opts = SearchOptions { top_k: REFLECT_CANDIDATE_LIMIT, ..Default::default() };
    let retrieved = retriever::search(blocks, vectors, embedder, &query, &opts, config).await?;

    let mut candidate_ids: Vec<String> = Vec::new();
    for result in retrieved {
        if result.block_id != seed_id && !candidate_ids.contains(&result.block_id) {
            candidate_ids.push(result.block_id);
        }
    }
    for edge in graph.neighbours(seed_id, Direction::Both, None)?.iter().take(REFLECT_CANDIDATE_LIMIT) {
        let other = if edge.source_id == seed_id { &edge.target_id } else { &edge.source_id };
        if other != seed_id && !candidate_ids.contains(other) {
            candidate_ids.push(other.clone());
        }
    }

    // Only live candidates can be reflection targets.
    let mut candidates: Vec<KnowledgeBlock> = Vec::new();
    for id in &candidate_ids {
        match blocks.read(id) {
            Ok(block) => candidates.push(block),
            Err(e) => debug!("[reflect] Candidate {} unavailable: {}", id, e),
        }
    }

    if candidates.is_empty() {
        info!("[reflect] No candidates for {}", seed_id);
        return Ok(0);
    }

    let Some(reasoner) = reasoner else {
        debug!("[reflect] No reasoner configured, skipping relationship proposals");
        return Ok(0);
    };

    // ── Propose ──────────────────────────────────────────────────────────
    let prompt = render_prompt(&seed, &candidates);
    let response = match reasoner.complete(&prompt).await {
        Ok(response) => response,
        Err(e) => {
            warn!("[reflect] Reasoner failed for {}: {}", seed_id, e);
            return Ok(0);
        }
    };

    // ── Validate and persist ─────────────────────────────────────────────
    let valid_targets: HashSet<&str> = candidates.iter().map(|b| b.id.as_str()).collect();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut persisted = 0usize;

    for triple in parse_triples(&response) {
        if triple.target_id == seed_id {
            continue;
        }
        if !valid_targets.contains(triple.target_id.as_str()) {
            debug!("[reflect] Dropping proposal to unknown target {}", triple.target_id);
            continue;
        }
        if !seen.insert((triple.target_id.clone(), triple.kind.clone())) {
            continue;
        }
        let weight = triple.weight.map(|w| w.clamp(0.0, 1.0));
        let rel = Relationship::new(
            seed_id,
            &triple.target_id,
            &triple.kind,
            weight,
            RelationOrigin::Reflection,
        );
        if graph.upsert(&rel)? {
            persisted += 1;
            info!(
                "[reflect] {} --[{}]--> {} (weight {:?})",
                seed_id, triple.kind, triple.target_id, weight
            );
        }
    }

    info!(
        "[reflect] {}: {} candidates considered, {} relationships persisted",
        seed_id,
        candidates.len(),
        persisted
    );
    Ok(persisted)
}

// ═══════════════════════════════════════════════════════════════════════════
// Prompt Rendering
// ═══════════════════════════════════════════════════════════════════════════

fn render_prompt(seed: &KnowledgeBlock, candidates: &[KnowledgeBlock]) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str("You analyze knowledge blocks and propose typed relationships.\n\n");
    prompt.push_str(&format!(
        "Seed block [{}] \"{}\" (tags: {}):\n{}\n\nCandidate blocks:\n",
        seed.id,
        seed.title,
        seed.tags.join(", "),
        seed.body
    ));
    for candidate in candidates {
        prompt.push_str(&format!(
            "- [{}] \"{}\": {}\n",
            candidate.id,
            candidate.title,
            candidate.body_prefix(REFLECT_BODY_PREFIX_CHARS)
        ));
    }
    prompt.push_str(
        "\nPropose relationships from the seed to candidates. Respond with only a \
         JSON array of objects, each with keys \"target_id\" (a candidate id), \
         \"kind\" (e.g. related_to, references, extends, contradicts), and \
         \"weight\" (a number between 0 and 1). Use [] if nothing relates.\n",
    );
    prompt
}

// ═══════════════════════════════════════════════════════════════════════════
// Response Parsing
// ═══════════════════════════════════════════════════════════════════════════

/// Extract relationship triples from a model response. Tolerates prose
/// around the JSON array; anything unparseable yields no triples.
fn parse_triples(response: &str) -> Vec<ProposedTriple> {
    let Some(start) = response.find('[') else {
        return Vec::new();
    };
    let Some(end) = response.rfind(']') else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&response[start..=end]) else {
        warn!("[reflect] Response contained no parseable JSON array");
        return Vec::new();
    };

    let mut triples = Vec::new();
    for item in items {
        let Some(target_id) = item["target_id"].as_str() else {
            continue;
        };
        let Some(kind) = item["kind"].as_str() else {
            continue;
        };
        if target_id.is_empty() || kind.is_empty() {
            continue;
        }
        triples.push(ProposedTriple {
            target_id: target_id.to_string(),
            kind: kind.to_string(),
            weight: item["weight"].as_f64(),
        });
    }
    triples
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
