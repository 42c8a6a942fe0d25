// ── Graph Store ────────────────────────────────────────────────────────────
//
// Typed directed relationships between block ids.
//
// The contract is small: idempotent upsert on (source, target, kind),
// direction/kind-filtered neighbour queries, and removal. Two providers
// satisfy it — a persistent SQLite store and an in-memory fallback that is
// behaviourally identical except for persistence. The engine selects the
// fallback (with a degraded-mode warning) when the configured backend
// cannot be opened.
//
// Relationships are never mutated after creation: a second upsert of the
// same identity triple leaves the stored edge untouched, including its
// weight and origin.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::MemoryResult;
use crate::atoms::types::{Direction, RelationOrigin, Relationship};

pub trait GraphStore: Send + Sync {
    /// Insert the relationship unless its `(source, target, kind)` identity
    /// already exists. Returns true when a new edge was written.
    fn upsert(&self, rel: &Relationship) -> MemoryResult<bool>;

    /// Relationships touching `id` in the given direction, optionally
    /// restricted to a set of kinds. Deterministic order:
    /// (source, target, kind) ascending.
    fn neighbours(
        &self,
        id: &str,
        direction: Direction,
        kinds: Option<&[String]>,
    ) -> MemoryResult<Vec<Relationship>>;

    /// Remove one edge. Returns true when something was deleted.
    fn remove(&self, source: &str, target: &str, kind: &str) -> MemoryResult<bool>;

    /// Total number of stored relationships.
    fn count(&self) -> MemoryResult<usize>;
}

fn matches_query(rel: &Relationship, id: &str, direction: Direction, kinds: Option<&[String]>) -> bool {
    let dir_ok = match direction {
        Direction::Out => rel.source_id == id,
        Direction::In => rel.target_id == id,
        Direction::Both => rel.source_id == id || rel.target_id == id,
    };
    if !dir_ok {
        return false;
    }
    match kinds {
        Some(kinds) => kinds.iter().any(|k| *k == rel.kind),
        None => true,
    }
}

fn sort_edges(edges: &mut [Relationship]) {
    edges.sort_by(|a, b| a.key().cmp(&b.key()));
}

// ═══════════════════════════════════════════════════════════════════════════
// In-Memory Fallback
// ═══════════════════════════════════════════════════════════════════════════

/// Process-local graph with the same observable behaviour as the persistent
/// store. Selected when no backend is configured or the backend is down.
#[derive(Default)]
pub struct InMemoryGraph {
    edges: RwLock<Vec<Relationship>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraph {
    fn upsert(&self, rel: &Relationship) -> MemoryResult<bool> {
        let mut edges = self.edges.write();
        if edges.iter().any(|e| e.key() == rel.key()) {
            return Ok(false);
        }
        edges.push(rel.clone());
        Ok(true)
    }

    fn neighbours(
        &self,
        id: &str,
        direction: Direction,
        kinds: Option<&[String]>,
    ) -> MemoryResult<Vec<Relationship>> {
        let edges = self.edges.read();
        let mut out: Vec<Relationship> = edges
            .iter()
            .filter(|e| matches_query(e, id, direction, kinds))
            .cloned()
            .collect();
        sort_edges(&mut out);
        Ok(out)
    }

    fn remove(&self, source: &str, target: &str, kind: &str) -> MemoryResult<bool> {
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| e.key() != (source, target, kind));
        Ok(edges.len() < before)
    }

    fn count(&self) -> MemoryResult<usize> {
        Ok(self.edges.read().len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLite Backend
// ═══════════════════════════════════════════════════════════════════════════

/// Persistent graph in a SQLite database. The composite primary key makes
/// upsert idempotency a property of the schema rather than of application
/// code.
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    pub fn open(path: &Path) -> MemoryResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS relationships (
                source_id  TEXT NOT NULL,
                target_id  TEXT NOT NULL,
                kind       TEXT NOT NULL,
                weight     REAL,
                origin     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_target
                ON relationships (target_id);",
        )?;
        debug!("[graph] Opened sqlite graph at {}", path.display());
        Ok(SqliteGraph { conn: Mutex::new(conn) })
    }

    fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
        let origin_raw: String = row.get(4)?;
        let created_raw: String = row.get(5)?;
        Ok(Relationship {
            source_id: row.get(0)?,
            target_id: row.get(1)?,
            kind: row.get(2)?,
            weight: row.get(3)?,
            origin: RelationOrigin::parse(&origin_raw).unwrap_or(RelationOrigin::Explicit),
            created_at: DateTime::parse_from_rfc3339(&created_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl GraphStore for SqliteGraph {
    fn upsert(&self, rel: &Relationship) -> MemoryResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relationships
                (source_id, target_id, kind, weight, origin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rel.source_id,
                rel.target_id,
                rel.kind,
                rel.weight,
                rel.origin.as_str(),
                rel.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn neighbours(
        &self,
        id: &str,
        direction: Direction,
        kinds: Option<&[String]>,
    ) -> MemoryResult<Vec<Relationship>> {
        let conn = self.conn.lock();
        let sql = match direction {
            Direction::Out => {
                "SELECT source_id, target_id, kind, weight, origin, created_at
                 FROM relationships WHERE source_id = ?1
                 ORDER BY source_id, target_id, kind"
            }
            Direction::In => {
                "SELECT source_id, target_id, kind, weight, origin, created_at
                 FROM relationships WHERE target_id = ?1
                 ORDER BY source_id, target_id, kind"
            }
            Direction::Both => {
                "SELECT source_id, target_id, kind, weight, origin, created_at
                 FROM relationships WHERE source_id = ?1 OR target_id = ?1
                 ORDER BY source_id, target_id, kind"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![id], Self::row_to_relationship)?;
        let mut out = Vec::new();
        for row in rows {
            let rel = row?;
            if kinds.map_or(true, |ks| ks.iter().any(|k| *k == rel.kind)) {
                out.push(rel);
            }
        }
        Ok(out)
    }

    fn remove(&self, source: &str, target: &str, kind: &str) -> MemoryResult<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM relationships WHERE source_id = ?1 AND target_id = ?2 AND kind = ?3",
            params![source, target, kind],
        )?;
        Ok(deleted > 0)
    }

    fn count(&self) -> MemoryResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))
            .optional()?
            .unwrap_or(0);
        Ok(n as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
