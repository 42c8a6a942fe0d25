// ── Vector Store ───────────────────────────────────────────────────────────
//
// Semantic index: one unit-norm embedding per block id, plus a metadata
// projection (title, tags, information type, content hash) used for sparse
// scoring and encode-cache checks.
//
// Queries are cosine nearest-neighbour with deterministic tie-breaking.
// Both providers do a full scan — catalogues here are thousands of blocks,
// not millions, and a scan keeps the two backends behaviourally identical.
//
// `reset` clears the whole collection; it exists for catalogue-wide
// reindexing (e.g. after an embedding model change).

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{MetadataFilter, VectorHit, VectorMetadata};

pub trait VectorStore: Send + Sync {
    /// Insert or replace the entry for `block_id`. The store holds at most
    /// one entry per id. Fails `Invalid` on a dimension mismatch with
    /// existing entries.
    fn upsert(&self, block_id: &str, embedding: &[f32], metadata: VectorMetadata) -> MemoryResult<()>;

    /// Drop the entry for `block_id`. Returns true when one existed.
    fn delete(&self, block_id: &str) -> MemoryResult<bool>;

    /// Top-`k` entries by cosine similarity to `embedding`, descending,
    /// ties broken by ascending block id.
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<VectorHit>>;

    /// Metadata of one entry, if present. Used for encode-cache checks.
    fn get_metadata(&self, block_id: &str) -> MemoryResult<Option<VectorMetadata>>;

    /// Clear the entire collection.
    fn reset(&self) -> MemoryResult<()>;

    fn count(&self) -> MemoryResult<usize>;
}

// ── Vector math ────────────────────────────────────────────────────────────

/// Cosine similarity between two vectors. Returns 0.0 for mismatched or
/// zero-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// L2-normalise in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-8 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Convert a byte slice (from a SQLite BLOB) to a Vec<f32>.
pub(crate) fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert a Vec<f32> to bytes for BLOB storage.
pub(crate) fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn rank_hits(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.block_id.cmp(&b.block_id))
    });
    hits.truncate(k);
    hits
}

// ═══════════════════════════════════════════════════════════════════════════
// In-Memory Fallback
// ═══════════════════════════════════════════════════════════════════════════

/// Process-local index with the same observable behaviour as the SQLite
/// store. Selected when no backend is configured or the backend is down.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, (Vec<f32>, VectorMetadata)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorIndex {
    fn upsert(&self, block_id: &str, embedding: &[f32], metadata: VectorMetadata) -> MemoryResult<()> {
        let mut entries = self.entries.write();
        if let Some((existing, _)) = entries.values().next() {
            if existing.len() != embedding.len() {
                return Err(MemoryError::invalid(format!(
                    "embedding dimension {} does not match catalogue dimension {}",
                    embedding.len(),
                    existing.len()
                )));
            }
        }
        entries.insert(block_id.to_string(), (embedding.to_vec(), metadata));
        Ok(())
    }

    fn delete(&self, block_id: &str) -> MemoryResult<bool> {
        Ok(self.entries.write().remove(block_id).is_some())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<VectorHit>> {
        let entries = self.entries.read();
        let hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(_, (_, meta))| filter.map_or(true, |f| f.matches(meta)))
            .map(|(id, (vec, meta))| VectorHit {
                block_id: id.clone(),
                similarity: cosine_similarity(embedding, vec),
                metadata: meta.clone(),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    fn get_metadata(&self, block_id: &str) -> MemoryResult<Option<VectorMetadata>> {
        Ok(self.entries.read().get(block_id).map(|(_, meta)| meta.clone()))
    }

    fn reset(&self) -> MemoryResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn count(&self) -> MemoryResult<usize> {
        Ok(self.entries.read().len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLite Backend
// ═══════════════════════════════════════════════════════════════════════════

/// Persistent vector index: embeddings as little-endian f32 BLOBs, metadata
/// as a JSON column. Scoring happens in process after a full scan.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(path: &Path) -> MemoryResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vector_entries (
                block_id  TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                dim       INTEGER NOT NULL,
                metadata  TEXT NOT NULL
            );",
        )?;
        debug!("[vector] Opened sqlite vector index at {}", path.display());
        Ok(SqliteVectorIndex { conn: Mutex::new(conn) })
    }
}

impl VectorStore for SqliteVectorIndex {
    fn upsert(&self, block_id: &str, embedding: &[f32], metadata: VectorMetadata) -> MemoryResult<()> {
        let conn = self.conn.lock();
        let existing_dim: Option<i64> = conn
            .query_row("SELECT dim FROM vector_entries LIMIT 1", [], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(dim) = existing_dim {
            if dim as usize != embedding.len() {
                return Err(MemoryError::invalid(format!(
                    "embedding dimension {} does not match catalogue dimension {}",
                    embedding.len(),
                    dim
                )));
            }
        }
        conn.execute(
            "INSERT INTO vector_entries (block_id, embedding, dim, metadata)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (block_id) DO UPDATE SET
                embedding = excluded.embedding,
                dim = excluded.dim,
                metadata = excluded.metadata",
            params![
                block_id,
                f32_vec_to_bytes(embedding),
                embedding.len() as i64,
                serde_json::to_string(&metadata)?,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, block_id: &str) -> MemoryResult<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM vector_entries WHERE block_id = ?1", params![block_id])?;
        Ok(deleted > 0)
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> MemoryResult<Vec<VectorHit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT block_id, embedding, metadata FROM vector_entries")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let meta_raw: String = row.get(2)?;
            Ok((id, blob, meta_raw))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, blob, meta_raw) = row?;
            let metadata: VectorMetadata = serde_json::from_str(&meta_raw)?;
            if filter.map_or(true, |f| f.matches(&metadata)) {
                hits.push(VectorHit {
                    block_id: id,
                    similarity: cosine_similarity(embedding, &bytes_to_f32_vec(&blob)),
                    metadata,
                });
            }
        }
        Ok(rank_hits(hits, k))
    }

    fn get_metadata(&self, block_id: &str) -> MemoryResult<Option<VectorMetadata>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT metadata FROM vector_entries WHERE block_id = ?1",
                params![block_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn reset(&self) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM vector_entries", [])?;
        Ok(())
    }

    fn count(&self) -> MemoryResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM vector_entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::InformationType;
    use tempfile::TempDir;

    fn meta(title: &str) -> VectorMetadata {
        VectorMetadata {
            title: title.into(),
            tags: vec!["test".into()],
            information_type: InformationType::Static,
            content_hash: "hash".into(),
        }
    }

    fn backends() -> Vec<(TempDir, Box<dyn VectorStore>)> {
        let dir_mem = TempDir::new().unwrap();
        let dir_sql = TempDir::new().unwrap();
        let sqlite = SqliteVectorIndex::open(&dir_sql.path().join("vectors.db")).unwrap();
        vec![
            (dir_mem, Box::new(InMemoryVectorIndex::new()) as Box<dyn VectorStore>),
            (dir_sql, Box::new(sqlite) as Box<dyn VectorStore>),
        ]
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn bytes_f32_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.14159, 0.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&original)), original);
    }

    #[test]
    fn test_upsert_replaces_single_entry() {
        for (_dir, store) in backends() {
            store.upsert("a", &[1.0, 0.0], meta("first")).unwrap();
            store.upsert("a", &[0.0, 1.0], meta("second")).unwrap();
            assert_eq!(store.count().unwrap(), 1);

            let hits = store.query(&[0.0, 1.0], 5, None).unwrap();
            assert_eq!(hits.len(), 1);
            assert!((hits[0].similarity - 1.0).abs() < 1e-6);
            assert_eq!(hits[0].metadata.title, "second");
        }
    }

    #[test]
    fn test_query_orders_by_similarity_then_id() {
        for (_dir, store) in backends() {
            store.upsert("b", &[1.0, 0.0], meta("b")).unwrap();
            store.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
            store.upsert("c", &[0.0, 1.0], meta("c")).unwrap();

            let hits = store.query(&[1.0, 0.0], 3, None).unwrap();
            let ids: Vec<&str> = hits.iter().map(|h| h.block_id.as_str()).collect();
            // a and b tie at similarity 1.0 → id order; c trails.
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_query_respects_k_and_filter() {
        for (_dir, store) in backends() {
            store.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
            let mut dynamic = meta("b");
            dynamic.information_type = InformationType::Dynamic;
            store.upsert("b", &[1.0, 0.0], dynamic).unwrap();

            assert_eq!(store.query(&[1.0, 0.0], 1, None).unwrap().len(), 1);

            let filter = MetadataFilter {
                information_type: Some(InformationType::Dynamic),
                ..Default::default()
            };
            let hits = store.query(&[1.0, 0.0], 5, Some(&filter)).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].block_id, "b");
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        for (_dir, store) in backends() {
            store.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
            let err = store.upsert("b", &[1.0, 0.0, 0.0], meta("b")).unwrap_err();
            assert!(matches!(err, MemoryError::Invalid(_)));
        }
    }

    #[test]
    fn test_delete_and_reset() {
        for (_dir, store) in backends() {
            store.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
            store.upsert("b", &[0.0, 1.0], meta("b")).unwrap();

            assert!(store.delete("a").unwrap());
            assert!(!store.delete("a").unwrap());
            assert_eq!(store.count().unwrap(), 1);

            store.reset().unwrap();
            assert_eq!(store.count().unwrap(), 0);
            assert!(store.query(&[1.0, 0.0], 5, None).unwrap().is_empty());
        }
    }

    #[test]
    fn test_get_metadata() {
        for (_dir, store) in backends() {
            assert!(store.get_metadata("a").unwrap().is_none());
            store.upsert("a", &[1.0, 0.0], meta("a")).unwrap();
            let got = store.get_metadata("a").unwrap().unwrap();
            assert_eq!(got.title, "a");
            assert_eq!(got.content_hash, "hash");
        }
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.db");
        {
            let store = SqliteVectorIndex::open(&path).unwrap();
            store.upsert("a", &[0.6, 0.8], meta("a")).unwrap();
        }
        let store = SqliteVectorIndex::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        let hits = store.query(&[0.6, 0.8], 1, None).unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }
}
