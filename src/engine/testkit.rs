// ── Test Kit ───────────────────────────────────────────────────────────────
// Deterministic stand-ins for the external adapters, shared by the module
// tests. Compiled only for tests.
//
// The mock embedder is a hashed bag-of-words: token overlap between texts
// produces cosine similarity, which is exactly the property retrieval and
// reflection tests need, with zero network and zero nondeterminism.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::engine::embedding::Embedder;
use crate::engine::reasoner::Reasoner;
use crate::engine::vector::l2_normalize;

/// Hashed bag-of-words embedder. Identical text → identical vector; shared
/// vocabulary → higher cosine.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        MockEmbedder { dim }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token) % self.dim as u64) as usize;
            vec[bucket] += 1.0;
        }
        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn model_name(&self) -> &str {
        "mock-bow"
    }
}

/// Always returns the same vector. Lets a test pin query cosine values by
/// seeding the index with handcrafted unit vectors.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> MemoryResult<Vec<f32>> {
        Ok(self.vector.clone())
    }

    fn model_name(&self) -> &str {
        "mock-fixed"
    }
}

/// An embedder that always fails, for exercising the terminal-error paths.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str) -> MemoryResult<Vec<f32>> {
        Err(MemoryError::EmbeddingUnavailable("mock outage".into()))
    }

    fn model_name(&self) -> &str {
        "mock-down"
    }
}

/// Replays scripted completions in order; errors once the script runs dry.
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<&str>) -> Self {
        ScriptedReasoner {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
        }
    }

    /// Number of completions not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| MemoryError::unavailable("reasoner", "script exhausted"))
    }

    fn model_name(&self) -> &str {
        "mock-scripted"
    }
}

/// A reasoner that always fails, for exercising the downgrade paths.
pub struct DownReasoner;

#[async_trait]
impl Reasoner for DownReasoner {
    async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
        Err(MemoryError::unavailable("reasoner", "mock outage"))
    }

    fn model_name(&self) -> &str {
        "mock-down"
    }
}
