// ── Compressor ─────────────────────────────────────────────────────────────
//
// Token-aware summarisation of an ordered block set under a hard target.
//
// Strategy ladder:
//   1. Everything fits → plain concatenation, no model call.
//   2. Reasoner configured → map-reduce: per-block summaries bounded by
//      ⌊T/(|B|+1)⌋ tokens (issued concurrently), then one reduce pass
//      bounded by T, then a recount with sentence-boundary truncation if
//      the model overshot.
//   3. No reasoner, or any reasoning failure → deterministic fallback:
//      ⌊T/|B|⌋ tokens per block, truncated at sentence boundaries.
//
// The target is a guarantee, not a hint: every path recounts its output and
// hard-truncates before returning. Reasoner failures downgrade, they never
// propagate.

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use regex::Regex;

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{CompressionConfig, KnowledgeBlock};
use crate::engine::reasoner::Reasoner;
use crate::engine::tokenizer::TokenCounter;

pub struct Compressor {
    reasoner: Option<Arc<dyn Reasoner>>,
    counter: Arc<dyn TokenCounter>,
    boundary: Regex,
}

impl Compressor {
    pub fn new(counter: Arc<dyn TokenCounter>, config: &CompressionConfig) -> MemoryResult<Self> {
        let boundary = Regex::new(&config.sentence_boundary_pattern).map_err(|e| {
            MemoryError::invalid(format!("bad sentence boundary pattern: {}", e))
        })?;
        Ok(Compressor { reasoner: None, counter, boundary })
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Compress `blocks` into at most `max_tokens` tokens. Infallible with
    /// respect to the reasoner: model trouble degrades to truncation.
    pub async fn compress(
        &self,
        blocks: &[KnowledgeBlock],
        max_tokens: usize,
    ) -> MemoryResult<String> {
        if max_tokens == 0 {
            return Err(MemoryError::invalid("max_tokens must be positive"));
        }
        if blocks.is_empty() {
            return Ok(String::new());
        }

        let full = render_blocks(blocks);
        let total = self.counter.count_tokens(&full);
        if total <= max_tokens {
            return Ok(full);
        }

        if let Some(ref reasoner) = self.reasoner {
            match self.map_reduce(reasoner.as_ref(), blocks, max_tokens).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    warn!("[compress] Reasoner failed ({}), using truncation fallback", e);
                }
            }
        }

        Ok(self.truncate_fallback(blocks, max_tokens))
    }

    // ── Map-reduce ─────────────────────────────────────────────────────────

    async fn map_reduce(
        &self,
        reasoner: &dyn Reasoner,
        blocks: &[KnowledgeBlock],
        max_tokens: usize,
    ) -> MemoryResult<String> {
        let per_block = (max_tokens / (blocks.len() + 1)).max(1);

        let map_calls = blocks.iter().map(|block| {
            let prompt = format!(
                "Summarize the following knowledge block in at most {} tokens, \
                 preserving the key facts.\n\nTitle: {}\n\n{}\n\nSummary:",
                per_block, block.title, block.body
            );
            async move { reasoner.complete(&prompt).await }
        });

        let mut summaries = Vec::with_capacity(blocks.len());
        for (block, result) in blocks.iter().zip(join_all(map_calls).await) {
            let summary = result?;
            // Models overshoot; cap each summary at its share before reduce.
            let bounded = self.truncate_at_sentences(&summary, per_block);
            summaries.push(format!("- {}: {}", block.title, bounded));
        }

        let reduce_prompt = format!(
            "Combine the following summaries into one coherent summary of at \
             most {} tokens.\n\n{}\n\nCombined summary:",
            max_tokens,
            summaries.join("\n")
        );
        let combined = reasoner.complete(&reduce_prompt).await?;

        let final_tokens = self.counter.count_tokens(&combined);
        if final_tokens > max_tokens {
            debug!(
                "[compress] Reduce output over target ({} > {}), truncating",
                final_tokens, max_tokens
            );
            return Ok(self.truncate_at_sentences(&combined, max_tokens));
        }
        Ok(combined)
    }

    // ── Deterministic fallback ─────────────────────────────────────────────

    fn truncate_fallback(&self, blocks: &[KnowledgeBlock], max_tokens: usize) -> String {
        let per_block = (max_tokens / blocks.len()).max(1);

        let mut out = String::new();
        for block in blocks {
            let header = format!("## {}\n\n", block.title);
            let header_tokens = self.counter.count_tokens(&header);
            let body_budget = per_block.saturating_sub(header_tokens);
            if body_budget == 0 {
                continue;
            }
            let body = self.truncate_at_sentences(&block.body, body_budget);
            if body.is_empty() {
                continue;
            }
            let section = format!("{}{}\n\n", header, body);

            let candidate_tokens =
                self.counter.count_tokens(&out) + self.counter.count_tokens(&section);
            if candidate_tokens > max_tokens {
                break;
            }
            out.push_str(&section);
        }

        let out = out.trim_end().to_string();
        if out.is_empty() {
            // Budget too small for even one headed section: hand the raw
            // concatenation to the sentence truncator so a non-empty input
            // still yields a non-empty bounded output.
            return self.truncate_at_sentences(&render_blocks(blocks), max_tokens);
        }
        // Estimator rounding can still push the joined text over.
        if self.counter.count_tokens(&out) > max_tokens {
            return self.truncate_at_sentences(&out, max_tokens);
        }
        out
    }

    /// Truncate `text` to `budget` tokens, cutting at the last sentence
    /// boundary that fits. When not even one sentence fits, fall back to
    /// halving the text until it does.
    pub(crate) fn truncate_at_sentences(&self, text: &str, budget: usize) -> String {
        if self.counter.count_tokens(text) <= budget {
            return text.to_string();
        }

        let mut kept_end = 0;
        for m in self.boundary.find_iter(text) {
            let candidate = text[..m.end()].trim_end();
            if self.counter.count_tokens(candidate) <= budget {
                kept_end = m.end();
            } else {
                break;
            }
        }
        if kept_end > 0 {
            return text[..kept_end].trim_end().to_string();
        }

        // No boundary fits: chop by characters.
        let mut end = text.len() / 2;
        loop {
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            let candidate = &text[..end];
            if end == 0 || self.counter.count_tokens(candidate) <= budget {
                return candidate.to_string();
            }
            end /= 2;
        }
    }
}

/// Concatenated rendering used when everything fits: one `##` section per
/// block, in the given order.
pub(crate) fn render_blocks(blocks: &[KnowledgeBlock]) -> String {
    blocks
        .iter()
        .map(|b| format!("## {}\n\n{}", b.title, b.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::{DownReasoner, ScriptedReasoner};
    use crate::engine::tokenizer::Tokenizer;

    fn compressor() -> Compressor {
        Compressor::new(Arc::new(Tokenizer::heuristic()), &CompressionConfig::default()).unwrap()
    }

    fn block(id: &str, title: &str, sentences: usize) -> KnowledgeBlock {
        let body = (0..sentences)
            .map(|i| format!("Sentence number {} carries a bit of factual payload. ", i))
            .collect::<String>();
        KnowledgeBlock::new(id, title, body.trim_end())
    }

    #[test]
    fn test_bad_boundary_pattern_rejected() {
        let config = CompressionConfig {
            sentence_boundary_pattern: "([".into(),
            ..Default::default()
        };
        assert!(Compressor::new(Arc::new(Tokenizer::heuristic()), &config).is_err());
    }

    #[tokio::test]
    async fn test_zero_budget_invalid() {
        let c = compressor();
        assert!(matches!(
            c.compress(&[block("KB-1", "A", 2)], 0).await,
            Err(MemoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_input_empty_output() {
        let c = compressor();
        assert_eq!(c.compress(&[], 100).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_under_budget_returns_concatenation() {
        let c = compressor();
        let blocks = vec![block("KB-1", "Alpha", 1), block("KB-2", "Beta", 1)];
        let out = c.compress(&blocks, 10_000).await.unwrap();
        assert!(out.starts_with("## Alpha"));
        assert!(out.contains("## Beta"));
        assert_eq!(out, render_blocks(&blocks));
    }

    #[tokio::test]
    async fn test_fallback_respects_budget_and_boundaries() {
        let c = compressor();
        let blocks = vec![
            block("KB-1", "Alpha", 40),
            block("KB-2", "Beta", 40),
            block("KB-3", "Gamma", 40),
        ];
        let budget = 120;
        let out = c.compress(&blocks, budget).await.unwrap();

        let counter = Tokenizer::heuristic();
        assert!(counter.count_tokens(&out) <= budget);
        assert!(out.contains("## Alpha"), "first block must contribute");
        // Truncation lands on a sentence end, not mid-word.
        let last_section = out.rsplit("## ").next().unwrap();
        assert!(
            last_section.trim_end().ends_with('.'),
            "expected sentence-boundary cut, got: …{}",
            &last_section[last_section.len().saturating_sub(40)..]
        );
    }

    #[tokio::test]
    async fn test_map_reduce_uses_reduce_output() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "Alpha distilled.",
            "Beta distilled.",
            "Combined digest of both blocks.",
        ]));
        let c = compressor().with_reasoner(reasoner.clone());

        let blocks = vec![block("KB-1", "Alpha", 60), block("KB-2", "Beta", 60)];
        let out = c.compress(&blocks, 60).await.unwrap();
        assert_eq!(out, "Combined digest of both blocks.");
        assert_eq!(reasoner.remaining(), 0, "map + reduce must each run once");
    }

    #[tokio::test]
    async fn test_map_reduce_overshoot_is_truncated() {
        let long_reply = "An overlong reduction. ".repeat(100);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "Alpha distilled.",
            "Beta distilled.",
            &long_reply,
        ]));
        let c = compressor().with_reasoner(reasoner);

        let budget = 50;
        let blocks = vec![block("KB-1", "Alpha", 60), block("KB-2", "Beta", 60)];
        let out = c.compress(&blocks, budget).await.unwrap();
        assert!(Tokenizer::heuristic().count_tokens(&out) <= budget);
        assert!(out.ends_with('.'));
    }

    #[tokio::test]
    async fn test_reasoner_failure_downgrades_to_fallback() {
        let c = compressor().with_reasoner(Arc::new(DownReasoner));
        let blocks = vec![block("KB-1", "Alpha", 60), block("KB-2", "Beta", 60)];
        let budget = 80;
        let out = c.compress(&blocks, budget).await.unwrap();
        assert!(!out.is_empty());
        assert!(Tokenizer::heuristic().count_tokens(&out) <= budget);
        assert!(out.contains("## Alpha"));
    }

    #[test]
    fn test_truncate_at_sentences_prefers_boundaries() {
        let c = compressor();
        let text = "First sentence here. Second sentence follows. Third one closes.";
        let out = c.truncate_at_sentences(text, 8);
        assert!(out.ends_with('.'));
        assert!(out.len() < text.len());
        assert!(Tokenizer::heuristic().count_tokens(&out) <= 8);
    }

    #[test]
    fn test_truncate_at_sentences_handles_unbreakable_text() {
        let c = compressor();
        let text = "x".repeat(4000);
        let out = c.truncate_at_sentences(&text, 10);
        assert!(Tokenizer::heuristic().count_tokens(&out) <= 10);
        assert!(!out.is_empty());
    }
}
