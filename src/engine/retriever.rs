// ── Retriever: Hybrid Search ───────────────────────────────────────────────
//
// Dense semantic similarity blended with sparse keyword signals:
//
//   1. Embed the query; pull a wide dense candidate pool.
//   2. Score sparse signals per candidate (whole-word, case-insensitive):
//      any query term in the title +0.20, in the body +0.10, in a tag +0.10.
//   3. User boost terms add +0.15 each on a match anywhere.
//   4. Exclusion terms disqualify candidates outright.
//   5. Dense mode: score = cosine + sparse (cosine dominates; sparse breaks
//      ties and lifts keyword-relevant blocks).
//      RRF mode: fuse the dense ranking with a sparse-only ranking via
//      Reciprocal Rank Fusion, Σ 1/(k + rank), k = 60. Only candidates with
//      a sparse score above zero appear in the sparse ranking — that
//      asymmetry is what lets a keyword match overtake raw cosine.
//   6. Deterministic ordering: score desc, cosine desc, id asc.
//
// Side effect: every returned block gets `record_access`; failures there
// are logged, never surfaced.

use log::warn;

use crate::atoms::constants::{DENSE_CANDIDATE_FACTOR, DENSE_CANDIDATE_MIN};
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{
    Explanation, KnowledgeBlock, RetrievalConfig, RetrievalMode, SearchOptions, SearchResult,
};
use crate::engine::blocks::BlockStore;
use crate::engine::embedding::Embedder;
use crate::engine::vector::VectorStore;

/// One candidate mid-pipeline, before final ranking.
struct Candidate {
    block_id: String,
    title: String,
    cosine: f64,
    sparse: f64,
    matched_boosts: Vec<String>,
    reason: Explanation,
}

/// Run one hybrid retrieval. See the module header for the algorithm.
pub async fn search(
    blocks: &BlockStore,
    vectors: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    opts: &SearchOptions,
    config: &RetrievalConfig,
) -> MemoryResult<Vec<SearchResult>> {
    if opts.top_k == 0 {
        return Err(MemoryError::invalid("top_k must be positive"));
    }

    let query_vec = embedder.embed(query).await?;

    let k_dense = (opts.top_k * DENSE_CANDIDATE_FACTOR).max(DENSE_CANDIDATE_MIN);
    let hits = vectors.query(&query_vec, k_dense, None)?;

    let query_terms = tokenize(query);
    let boost_terms: Vec<String> = opts.boost.iter().map(|t| t.to_lowercase()).collect();
    let exclude_terms: Vec<String> = opts.exclude.iter().map(|t| t.to_lowercase()).collect();

    let mut candidates: Vec<Candidate> = Vec::with_capacity(hits.len());
    for hit in hits {
        // The index should only hold active blocks; a candidate whose file
        // is gone or unreadable is dropped rather than failing the query.
        let block = match blocks.read(&hit.block_id) {
            Ok(block) => block,
            Err(e) => {
                warn!("[retriever] Dropping candidate {}: {}", hit.block_id, e);
                continue;
            }
        };
        if block.archived {
            continue;
        }
        if is_excluded(&block, &exclude_terms) {
            continue;
        }
        candidates.push(score_sparse(&block, hit.similarity, &query_terms, &boost_terms, config));
    }

    let mut results = match opts.mode {
        RetrievalMode::Dense => rank_dense(candidates),
        RetrievalMode::Rrf => rank_rrf(candidates, config.rrf_k),
    };
    results.truncate(opts.top_k);

    for result in &results {
        if let Err(e) = blocks.record_access(&result.block_id) {
            warn!("[retriever] record_access failed for {}: {}", result.block_id, e);
        }
    }

    Ok(results)
}

// ═══════════════════════════════════════════════════════════════════════════
// Sparse Scoring
// ═══════════════════════════════════════════════════════════════════════════

fn score_sparse(
    block: &KnowledgeBlock,
    cosine: f64,
    query_terms: &[String],
    boost_terms: &[String],
    config: &RetrievalConfig,
) -> Candidate {
    let title = block.title.to_lowercase();
    let body = block.body.to_lowercase();

    let mut reason = Explanation { semantic: cosine, ..Default::default() };
    let mut sparse = 0.0;

    let title_hits: Vec<String> = query_terms
        .iter()
        .filter(|t| contains_whole_word(&title, t))
        .cloned()
        .collect();
    if !title_hits.is_empty() {
        sparse += config.title_boost;
        reason.title_terms = title_hits;
    }

    let body_hits: Vec<String> = query_terms
        .iter()
        .filter(|t| contains_whole_word(&body, t))
        .cloned()
        .collect();
    if !body_hits.is_empty() {
        sparse += config.body_boost;
        reason.body_terms = body_hits;
    }

    let tag_hits: Vec<String> = query_terms
        .iter()
        .filter(|t| block.tags.iter().any(|tag| contains_whole_word(tag, t)))
        .cloned()
        .collect();
    if !tag_hits.is_empty() {
        sparse += config.tag_boost;
        reason.tag_terms = tag_hits;
    }

    let mut matched_boosts = Vec::new();
    for term in boost_terms {
        let hit = contains_whole_word(&title, term)
            || contains_whole_word(&body, term)
            || block.tags.iter().any(|tag| contains_whole_word(tag, term));
        if hit {
            sparse += config.user_boost;
            matched_boosts.push(term.clone());
        }
    }
    reason.boost_terms = matched_boosts.clone();
    reason.sparse = sparse;

    Candidate {
        block_id: block.id.clone(),
        title: block.title.clone(),
        cosine,
        sparse,
        matched_boosts,
        reason,
    }
}

fn is_excluded(block: &KnowledgeBlock, exclude_terms: &[String]) -> bool {
    if exclude_terms.is_empty() {
        return false;
    }
    let title = block.title.to_lowercase();
    let body = block.body.to_lowercase();
    exclude_terms.iter().any(|term| {
        contains_whole_word(&title, term)
            || contains_whole_word(&body, term)
            || block.tags.iter().any(|tag| contains_whole_word(tag, term))
    })
}

/// Lowercased, deduplicated alphanumeric terms of a query, in order.
fn tokenize(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for token in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if !terms.iter().any(|t| t == token) {
            terms.push(token.to_string());
        }
    }
    terms
}

/// Whole-word containment: `term` occurs in `haystack` with non-alphanumeric
/// (or string-edge) neighbours on both sides. Both inputs must already be
/// lowercased.
fn contains_whole_word(haystack: &str, term: &str) -> bool {
    if term.is_empty() || haystack.len() < term.len() {
        return false;
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = start + term.len();
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// Ranking
// ═══════════════════════════════════════════════════════════════════════════

fn final_sort(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.cosine_similarity
                    .partial_cmp(&a.cosine_similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.block_id.cmp(&b.block_id))
    });
}

fn into_result(c: Candidate, score: f64) -> SearchResult {
    SearchResult {
        block_id: c.block_id,
        title: c.title,
        score,
        cosine_similarity: c.cosine,
        sparse_score: c.sparse,
        matched_boosts: c.matched_boosts,
        reason: c.reason,
    }
}

fn rank_dense(candidates: Vec<Candidate>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|c| {
            let score = c.cosine + c.sparse;
            into_result(c, score)
        })
        .collect();
    final_sort(&mut results);
    results
}

/// Reciprocal Rank Fusion over the dense and sparse orderings of the same
/// candidate pool. Ranks are 1-based; candidates missing from a ranking
/// contribute nothing for it.
fn rank_rrf(mut candidates: Vec<Candidate>, rrf_k: f64) -> Vec<SearchResult> {
    // Dense ranking: all candidates, by cosine.
    candidates.sort_by(|a, b| {
        b.cosine
            .partial_cmp(&a.cosine)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.block_id.cmp(&b.block_id))
    });
    for (i, c) in candidates.iter_mut().enumerate() {
        c.reason.dense_rank = Some(i + 1);
    }

    // Sparse ranking: only candidates with a keyword signal.
    let mut sparse_order: Vec<(String, f64, f64)> = candidates
        .iter()
        .filter(|c| c.sparse > 0.0)
        .map(|c| (c.block_id.clone(), c.sparse, c.cosine))
        .collect();
    sparse_order.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.0.cmp(&b.0))
    });
    for (i, (id, _, _)) in sparse_order.iter().enumerate() {
        if let Some(c) = candidates.iter_mut().find(|c| c.block_id == *id) {
            c.reason.sparse_rank = Some(i + 1);
        }
    }

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|mut c| {
            let mut fused = 0.0;
            if let Some(rank) = c.reason.dense_rank {
                fused += 1.0 / (rrf_k + rank as f64);
            }
            if let Some(rank) = c.reason.sparse_rank {
                fused += 1.0 / (rrf_k + rank as f64);
            }
            c.reason.rrf_score = Some(fused);
            into_result(c, fused)
        })
        .collect();
    final_sort(&mut results);
    results
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::MockEmbedder;
    use crate::engine::vector::InMemoryVectorIndex;
    use crate::atoms::types::VectorMetadata;
    use tempfile::TempDir;

    // ── Pure helpers ───────────────────────────────────────────────────────

    #[test]
    fn test_contains_whole_word() {
        assert!(contains_whole_word("boosts nad levels", "nad"));
        assert!(contains_whole_word("nad", "nad"));
        assert!(contains_whole_word("raises nad+ levels", "nad"));
        assert!(!contains_whole_word("nadir of the curve", "nad"));
        assert!(!contains_whole_word("contest", "test"));
        assert!(contains_whole_word("a test case", "test"));
        assert!(!contains_whole_word("", "x"));
        assert!(!contains_whole_word("short", "muchlongerterm"));
    }

    #[test]
    fn test_tokenize_dedups_and_lowercases() {
        assert_eq!(tokenize("What boosts NAD? boosts!"), vec!["what", "boosts", "nad"]);
        assert!(tokenize("???").is_empty());
    }

    // ── End-to-end search over in-memory stores ────────────────────────────

    async fn seed(
        store: &BlockStore,
        vectors: &InMemoryVectorIndex,
        embedder: &MockEmbedder,
        id: &str,
        title: &str,
        body: &str,
        tags: &[&str],
    ) {
        let mut block = KnowledgeBlock::new(id, title, body)
            .with_tags(tags.iter().map(|t| t.to_string()).collect());
        store.write(&mut block).unwrap();
        let vec = embedder.embed(&block.body).await.unwrap();
        vectors.upsert(id, &vec, VectorMetadata::from_block(&block)).unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        blocks: BlockStore,
        vectors: InMemoryVectorIndex,
        embedder: MockEmbedder,
        config: RetrievalConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let blocks = BlockStore::open(dir.path(), dir.path().join("archive")).unwrap();
        Fixture {
            _dir: dir,
            blocks,
            vectors: InMemoryVectorIndex::new(),
            embedder: MockEmbedder::new(64),
            config: RetrievalConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_zero_top_k_is_invalid() {
        let f = fixture();
        let opts = SearchOptions { top_k: 0, ..Default::default() };
        let err = search(&f.blocks, &f.vectors, &f.embedder, "q", &opts, &f.config)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_embedder_failure_is_terminal() {
        use crate::engine::testkit::DownEmbedder;

        // Embedding is the one signal with no degraded substitute: the
        // query must fail before any candidate work, and no access may be
        // recorded.
        let f = fixture();
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-1", "Alpha", "Some alpha text.", &[]).await;

        let opts = SearchOptions { top_k: 1, ..Default::default() };
        let err = search(&f.blocks, &f.vectors, &DownEmbedder, "alpha", &opts, &f.config)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingUnavailable(_)), "got: {:?}", err);
        assert_eq!(f.blocks.read("KB-1").unwrap().access_count, 0);
    }

    #[tokio::test]
    async fn test_ranking_prefers_term_overlap_and_sparse_boosts() {
        let f = fixture();
        seed(
            &f.blocks, &f.vectors, &f.embedder,
            "KB-1", "NMN precursor of NAD",
            "NMN is a direct precursor of NAD and supplementing NMN boosts NAD levels.",
            &["nad"],
        ).await;
        seed(
            &f.blocks, &f.vectors, &f.embedder,
            "KB-2", "Resveratrol activates sirtuins",
            "Resveratrol activates sirtuins which consume NAD during their activity.",
            &["sirtuins"],
        ).await;
        seed(
            &f.blocks, &f.vectors, &f.embedder,
            "KB-3", "Unrelated: macrame patterns",
            "Square knots and spiral knots for decorative wall hangings.",
            &["crafts"],
        ).await;

        let opts = SearchOptions { top_k: 2, ..Default::default() };
        let results = search(&f.blocks, &f.vectors, &f.embedder, "what boosts NAD", &opts, &f.config)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].block_id, "KB-1");
        assert_eq!(results[1].block_id, "KB-2");
        // Sparse trace: NAD hits title+body+tags on KB-1.
        assert!(results[0].sparse_score > results[1].sparse_score);
        assert!(results[0].reason.title_terms.contains(&"nad".to_string()));
        assert!(results[0].score > results[0].cosine_similarity);
    }

    #[tokio::test]
    async fn test_exclusion_is_whole_word() {
        let f = fixture();
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-1", "Notes on tests",
             "This block mentions test explicitly.", &[]).await;
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-2", "Notes on contests",
             "A contest survives the filter: the term appears only embedded in longer words.", &[]).await;
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-3", "Plain notes",
             "Nothing relevant here.", &[]).await;

        let opts = SearchOptions {
            top_k: 5,
            exclude: vec!["test".into()],
            ..Default::default()
        };
        let results = search(&f.blocks, &f.vectors, &f.embedder, "notes", &opts, &f.config)
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.block_id.as_str()).collect();
        assert!(!ids.contains(&"KB-1"), "whole-word match must be excluded");
        assert!(ids.contains(&"KB-2"), "substring-only match must survive");
        assert!(ids.contains(&"KB-3"));
    }

    #[tokio::test]
    async fn test_boost_terms_add_fixed_bonus_once_each() {
        let f = fixture();
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-1", "Alpha notes",
             "Contains magnesium twice: magnesium.", &[]).await;
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-2", "Beta notes",
             "No minerals mentioned.", &[]).await;

        let opts = SearchOptions {
            top_k: 5,
            boost: vec!["magnesium".into()],
            ..Default::default()
        };
        let results = search(&f.blocks, &f.vectors, &f.embedder, "notes", &opts, &f.config)
            .await
            .unwrap();

        let boosted = results.iter().find(|r| r.block_id == "KB-1").unwrap();
        let plain = results.iter().find(|r| r.block_id == "KB-2").unwrap();
        assert_eq!(boosted.matched_boosts, vec!["magnesium"]);
        assert!(plain.matched_boosts.is_empty());
        // +0.15 once, not per occurrence.
        assert!((boosted.sparse_score - plain.sparse_score - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rrf_lets_keyword_match_overtake_cosine() {
        // KB-A: cosine 0.82, no query term anywhere. KB-B: cosine 0.58,
        // query term in its title. Dense mode keeps A on top. In RRF mode A
        // is absent from the sparse ranking, so B collects contributions
        // from both rankings (1/(60+2) + 1/(60+1)) against A's dense-only
        // 1/(60+1) — the order must invert.
        use crate::engine::testkit::FixedEmbedder;

        let dir = TempDir::new().unwrap();
        let blocks = BlockStore::open(dir.path(), dir.path().join("archive")).unwrap();
        let vectors = InMemoryVectorIndex::new();
        let embedder = FixedEmbedder { vector: vec![1.0, 0.0] };
        let config = RetrievalConfig::default();

        for (id, title, cosine) in [
            ("KB-A", "Mitochondrial energetics", 0.82f32),
            ("KB-B", "Thermostat wiring guide", 0.58f32),
        ] {
            let mut block = KnowledgeBlock::new(id, title, "Body without query vocabulary.");
            blocks.write(&mut block).unwrap();
            let embedding = vec![cosine, (1.0 - cosine * cosine).sqrt()];
            vectors
                .upsert(id, &embedding, crate::atoms::types::VectorMetadata::from_block(&block))
                .unwrap();
        }

        let query = "thermostat setup";
        let dense_opts = SearchOptions { top_k: 2, ..Default::default() };
        let rrf_opts = SearchOptions { top_k: 2, mode: RetrievalMode::Rrf, ..Default::default() };

        let dense = search(&blocks, &vectors, &embedder, query, &dense_opts, &config)
            .await
            .unwrap();
        let rrf = search(&blocks, &vectors, &embedder, query, &rrf_opts, &config)
            .await
            .unwrap();

        assert_eq!(dense[0].block_id, "KB-A", "dense mode must rank by cosine");
        assert_eq!(rrf[0].block_id, "KB-B", "sparse-rank advantage must compensate");
        assert_eq!(rrf[0].reason.sparse_rank, Some(1));
        assert_eq!(rrf[0].reason.dense_rank, Some(2));
        assert!(rrf[0].reason.rrf_score.unwrap() > rrf[1].reason.rrf_score.unwrap());

        let a = rrf.iter().find(|r| r.block_id == "KB-A").unwrap();
        assert_eq!(a.sparse_score, 0.0);
        assert_eq!(a.reason.sparse_rank, None);
    }

    #[tokio::test]
    async fn test_retrieval_records_access() {
        let f = fixture();
        seed(&f.blocks, &f.vectors, &f.embedder, "KB-1", "Alpha", "Some alpha text.", &[]).await;

        let opts = SearchOptions { top_k: 1, ..Default::default() };
        search(&f.blocks, &f.vectors, &f.embedder, "alpha", &opts, &f.config).await.unwrap();
        search(&f.blocks, &f.vectors, &f.embedder, "alpha", &opts, &f.config).await.unwrap();

        let block = f.blocks.read("KB-1").unwrap();
        assert_eq!(block.access_count, 2);
    }

    #[tokio::test]
    async fn test_results_strictly_ordered_and_capped() {
        let f = fixture();
        for i in 0..8 {
            seed(
                &f.blocks, &f.vectors, &f.embedder,
                &format!("KB-{}", i), &format!("Note {}", i),
                &format!("generic shared filler text plus unique token tok{}", i),
                &[],
            ).await;
        }

        let opts = SearchOptions { top_k: 5, ..Default::default() };
        let results = search(&f.blocks, &f.vectors, &f.embedder, "generic filler", &opts, &f.config)
            .await
            .unwrap();
        assert!(results.len() <= 5);
        for pair in results.windows(2) {
            let ordered = pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score
                    && (pair[0].cosine_similarity > pair[1].cosine_similarity
                        || (pair[0].cosine_similarity == pair[1].cosine_similarity
                            && pair[0].block_id < pair[1].block_id)));
            assert!(ordered, "results must be deterministically ordered");
        }
    }
}
