// ── Block Store ────────────────────────────────────────────────────────────
//
// Authoritative persistent store of knowledge blocks, one frontmatter+body
// file per block:
//
//   <block_dir>/<id>.md           active blocks
//   <block_dir>/archive/<id>.md   archived blocks
//
// The file layer is the durable source of truth; the graph and vector
// stores are derivatives that can be rebuilt from here.
//
// Responsibilities:
//   - Frontmatter codec (typed known keys, unknown keys preserved)
//   - Content hashing and hash verification on every read
//   - Atomic write-then-rename persistence
//   - Access-metadata writeback (frontmatter only, hash unchanged)
//   - Archive moves and restores
//   - Per-day monotonic id generation

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::atoms::constants::{BLOCK_ID_PREFIX, BLOCK_ID_SEQ_WIDTH};
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{FrontValue, InformationType, KnowledgeBlock};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub struct BlockStore {
    root: PathBuf,
    archive: PathBuf,
    /// Serialises id generation so two concurrent `record`s on the same day
    /// never mint the same sequence number.
    id_lock: Mutex<()>,
}

impl BlockStore {
    /// Open (creating if needed) a block catalogue rooted at `root` with its
    /// archive at `archive`.
    pub fn open(root: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> MemoryResult<Self> {
        let root = root.into();
        let archive = archive.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(&archive)?;
        debug!("[blocks] Opened catalogue at {}", root.display());
        Ok(BlockStore { root, archive, id_lock: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn live_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.md", id))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.archive.join(format!("{}.md", id))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.live_path(id).is_file()
    }

    pub fn exists_archived(&self, id: &str) -> bool {
        self.archive_path(id).is_file()
    }

    // ── Write ──────────────────────────────────────────────────────────────

    /// Persist a block. Recomputes `content_hash`, stamps `updated_at`, and
    /// writes atomically (temp file + rename) into the live or archive area
    /// according to the `archived` flag.
    ///
    /// The body is normalised to have no trailing whitespace — the file
    /// format cannot represent it losslessly, and the hash must survive a
    /// write/read round trip.
    pub fn write(&self, block: &mut KnowledgeBlock) -> MemoryResult<()> {
        let trimmed = block.body.trim_end();
        if trimmed.len() != block.body.len() {
            block.body = trimmed.to_string();
        }
        block.updated_at = Utc::now();
        block.content_hash = content_hash(block);
        let path = if block.archived { self.archive_path(&block.id) } else { self.live_path(&block.id) };
        self.write_file(&path, block)
    }

    /// Persist access metadata only: `access_count`/`last_access` change,
    /// body, `updated_at`, and `content_hash` stay as they are on disk.
    pub fn record_access(&self, id: &str) -> MemoryResult<()> {
        let mut block = self.read(id)?;
        block.access_count += 1;
        block.last_access = Utc::now();
        self.write_file(&self.live_path(id), &block)
    }

    fn write_file(&self, path: &Path, block: &KnowledgeBlock) -> MemoryResult<()> {
        let rendered = render(block);
        let dir = path.parent().ok_or_else(|| {
            MemoryError::Internal(format!("block path has no parent: {}", path.display()))
        })?;
        let tmp = dir.join(format!(".{}.tmp", block.id));
        fs::write(&tmp, rendered)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    // ── Read ───────────────────────────────────────────────────────────────

    /// Read an active block. Archived blocks are reachable only through
    /// `read_archived`.
    pub fn read(&self, id: &str) -> MemoryResult<KnowledgeBlock> {
        let path = self.live_path(id);
        if !path.is_file() {
            return Err(MemoryError::not_found(id));
        }
        self.read_file(id, &path)
    }

    /// Read a block out of the archive area.
    pub fn read_archived(&self, id: &str) -> MemoryResult<KnowledgeBlock> {
        let path = self.archive_path(id);
        if !path.is_file() {
            return Err(MemoryError::not_found(id));
        }
        self.read_file(id, &path)
    }

    fn read_file(&self, id: &str, path: &Path) -> MemoryResult<KnowledgeBlock> {
        let raw = fs::read_to_string(path)
            .map_err(|e| MemoryError::corruption(id, format!("unreadable file: {}", e)))?;
        let mut block = parse(id, &raw)?;

        // The stored hash must match the content we just parsed. A mismatch
        // means the file was edited without going through `write`.
        let computed = content_hash(&block);
        if !block.content_hash.is_empty() && block.content_hash != computed {
            return Err(MemoryError::corruption(
                id,
                format!("content hash mismatch (stored {}…)", &block.content_hash[..12.min(block.content_hash.len())]),
            ));
        }
        block.content_hash = computed;
        Ok(block)
    }

    // ── Listing ────────────────────────────────────────────────────────────

    /// Ids of all active blocks, in deterministic (lexicographic) order.
    pub fn list(&self) -> MemoryResult<Vec<String>> {
        list_dir(&self.root)
    }

    /// Ids of all archived blocks, in deterministic order.
    pub fn list_archived(&self) -> MemoryResult<Vec<String>> {
        list_dir(&self.archive)
    }

    // ── Archive moves ──────────────────────────────────────────────────────

    /// Relocate a block under the archive area and set its `archived` flag.
    pub fn move_to_archive(&self, id: &str) -> MemoryResult<()> {
        let mut block = self.read(id)?;
        block.archived = true;
        // Write the flagged copy into the archive first, then drop the live
        // file — a crash in between leaves both copies, never neither.
        self.write_file(&self.archive_path(id), &block)?;
        fs::remove_file(self.live_path(id))?;
        debug!("[blocks] Archived {}", id);
        Ok(())
    }

    /// Reverse of `move_to_archive`. Fails `AlreadyExists` if a live block
    /// with the same id has appeared in the meantime.
    pub fn restore_from_archive(&self, id: &str) -> MemoryResult<()> {
        let mut block = self.read_archived(id)?;
        if self.exists(id) {
            return Err(MemoryError::already_exists(id));
        }
        block.archived = false;
        self.write_file(&self.live_path(id), &block)?;
        fs::remove_file(self.archive_path(id))?;
        debug!("[blocks] Restored {}", id);
        Ok(())
    }

    // ── Id generation ──────────────────────────────────────────────────────

    /// Mint the next `KB-<YYYYMMDD>-<NNN>` id for today. Scans both live and
    /// archived files so restores never collide with later blocks.
    pub fn generate_id(&self) -> MemoryResult<String> {
        let _guard = self.id_lock.lock();
        let day = Utc::now().format("%Y%m%d").to_string();
        let prefix = format!("{}-{}-", BLOCK_ID_PREFIX, day);

        let mut max_seq = 0u32;
        for id in self.list()?.into_iter().chain(self.list_archived()?) {
            if let Some(rest) = id.strip_prefix(&prefix) {
                if let Ok(n) = rest.parse::<u32>() {
                    max_seq = max_seq.max(n);
                }
            }
        }
        Ok(format!("{}{:0width$}", prefix, max_seq + 1, width = BLOCK_ID_SEQ_WIDTH))
    }
}

fn list_dir(dir: &Path) -> MemoryResult<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                // Skip temp files left over from an interrupted write.
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
    }
    ids.sort();
    Ok(ids)
}

// ═══════════════════════════════════════════════════════════════════════════
// Content Hash
// ═══════════════════════════════════════════════════════════════════════════

/// SHA-256 over the body plus normalised identity frontmatter: title, sorted
/// tags, information type, and sorted extra pairs. Access metadata and
/// timestamps are deliberately excluded — `record_access` must never
/// invalidate the embedding cache.
pub fn content_hash(block: &KnowledgeBlock) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block.body.as_bytes());
    hasher.update(b"\n---\n");
    hasher.update(block.title.as_bytes());
    hasher.update(b"\n");
    let mut tags = block.tags.clone();
    tags.sort();
    hasher.update(tags.join(",").as_bytes());
    hasher.update(b"\n");
    hasher.update(block.information_type.as_str().as_bytes());
    for (key, value) in &block.extra {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        match value {
            FrontValue::List(items) => hasher.update(items.join(",").as_bytes()),
            other => hasher.update(other.as_scalar().unwrap_or_default().as_bytes()),
        }
    }
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════
// Frontmatter Codec
// ═══════════════════════════════════════════════════════════════════════════

fn render(block: &KnowledgeBlock) -> String {
    let mut out = String::with_capacity(block.body.len() + 512);
    out.push_str("---\n");
    push_scalar(&mut out, "id", &block.id);
    push_scalar(&mut out, "title", &block.title);
    if block.tags.is_empty() {
        out.push_str("tags: []\n");
    } else {
        out.push_str("tags:\n");
        for tag in &block.tags {
            out.push_str("  - ");
            out.push_str(tag);
            out.push('\n');
        }
    }
    push_scalar(&mut out, "created", &block.created_at.format(TIMESTAMP_FORMAT).to_string());
    push_scalar(&mut out, "updated", &block.updated_at.format(TIMESTAMP_FORMAT).to_string());
    push_scalar(&mut out, "content_hash", &block.content_hash);
    out.push_str(&format!("access_count: {}\n", block.access_count));
    push_scalar(&mut out, "last_access", &block.last_access.format(TIMESTAMP_FORMAT).to_string());
    push_scalar(&mut out, "information_type", block.information_type.as_str());
    out.push_str(&format!("archived: {}\n", block.archived));
    for (key, value) in &block.extra {
        match value {
            FrontValue::List(items) => {
                if items.is_empty() {
                    out.push_str(&format!("{}: []\n", key));
                } else {
                    out.push_str(&format!("{}:\n", key));
                    for item in items {
                        out.push_str("  - ");
                        out.push_str(item);
                        out.push('\n');
                    }
                }
            }
            FrontValue::Str(s) => push_scalar(&mut out, key, s),
            FrontValue::Bool(b) => out.push_str(&format!("{}: {}\n", key, b)),
            FrontValue::Int(i) => out.push_str(&format!("{}: {}\n", key, i)),
            FrontValue::Float(f) => out.push_str(&format!("{}: {}\n", key, f)),
        }
    }
    out.push_str("---\n\n");
    out.push_str(&block.body);
    out
}

fn push_scalar(out: &mut String, key: &str, value: &str) {
    if needs_quoting(value) {
        out.push_str(&format!("{}: \"{}\"\n", key, value.replace('\\', "\\\\").replace('"', "\\\"")));
    } else {
        out.push_str(&format!("{}: {}\n", key, value));
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.contains(':')
        || value.contains('#')
        || value.contains('"')
        || value.starts_with(['[', '{', '-', ' '])
        || value.ends_with(' ')
}

fn parse(id: &str, raw: &str) -> MemoryResult<KnowledgeBlock> {
    let mut lines = raw.lines();
    if lines.next().map(str::trim) != Some("---") {
        return Err(MemoryError::corruption(id, "missing frontmatter delimiter"));
    }

    let mut fields: BTreeMap<String, FrontValue> = BTreeMap::new();
    let mut pending_list_key: Option<String> = None;
    let mut pending_list: Vec<String> = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in lines {
        if in_body {
            body_lines.push(line);
            continue;
        }
        if line.trim() == "---" {
            if let Some(key) = pending_list_key.take() {
                fields.insert(key, FrontValue::List(std::mem::take(&mut pending_list)));
            }
            in_body = true;
            continue;
        }

        // Continuation of a block list: `  - item`
        let trimmed = line.trim_start();
        if pending_list_key.is_some() && trimmed.starts_with("- ") {
            pending_list.push(trimmed[2..].trim().to_string());
            continue;
        }
        if let Some(key) = pending_list_key.take() {
            fields.insert(key, FrontValue::List(std::mem::take(&mut pending_list)));
        }

        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| MemoryError::corruption(id, format!("bad frontmatter line: {:?}", line)))?;
        let key = key.trim().to_string();
        let value = value.trim();

        if value.is_empty() {
            // A bare `key:` opens a block list.
            pending_list_key = Some(key);
        } else {
            fields.insert(key, parse_scalar(value));
        }
    }

    if !in_body {
        return Err(MemoryError::corruption(id, "unterminated frontmatter"));
    }

    let mut body = body_lines.join("\n");
    // The writer puts one blank line between the delimiter and the body.
    if let Some(stripped) = body.strip_prefix('\n') {
        body = stripped.to_string();
    }

    build_block(id, fields, body)
}

fn parse_scalar(value: &str) -> FrontValue {
    // Inline list: [a, b, c]
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        let items: Vec<String> = inner
            .split(',')
            .map(|s| s.trim().trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return FrontValue::List(items);
    }
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return FrontValue::Str(inner.replace("\\\"", "\"").replace("\\\\", "\\"));
    }
    match value {
        "true" => return FrontValue::Bool(true),
        "false" => return FrontValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return FrontValue::Int(i);
    }
    // Timestamps contain '-' and ':' and would parse as neither int nor
    // float; they stay strings and are interpreted by the caller.
    if !value.contains(|c: char| c.is_ascii_alphabetic()) {
        if let Ok(f) = value.parse::<f64>() {
            return FrontValue::Float(f);
        }
    }
    FrontValue::Str(value.to_string())
}

fn build_block(
    file_id: &str,
    mut fields: BTreeMap<String, FrontValue>,
    body: String,
) -> MemoryResult<KnowledgeBlock> {
    let take_str = |fields: &mut BTreeMap<String, FrontValue>, key: &str| -> Option<String> {
        match fields.remove(key) {
            Some(FrontValue::Str(s)) => Some(s),
            Some(other) => other.as_scalar(),
            None => None,
        }
    };

    let id = take_str(&mut fields, "id")
        .ok_or_else(|| MemoryError::corruption(file_id, "missing required key: id"))?;
    let title = take_str(&mut fields, "title")
        .ok_or_else(|| MemoryError::corruption(file_id, "missing required key: title"))?;
    let created_raw = take_str(&mut fields, "created")
        .ok_or_else(|| MemoryError::corruption(file_id, "missing required key: created"))?;
    let created_at = parse_timestamp(file_id, "created", &created_raw)?;

    let updated_at = match take_str(&mut fields, "updated") {
        Some(raw) => parse_timestamp(file_id, "updated", &raw)?,
        None => created_at,
    };
    let last_access = match take_str(&mut fields, "last_access") {
        Some(raw) => parse_timestamp(file_id, "last_access", &raw)?,
        None => created_at,
    };

    let tags = match fields.remove("tags") {
        Some(FrontValue::List(items)) => items,
        Some(FrontValue::Str(s)) => vec![s],
        Some(_) => return Err(MemoryError::corruption(file_id, "tags must be a list")),
        None => Vec::new(),
    };

    let access_count = match fields.remove("access_count") {
        Some(FrontValue::Int(i)) if i >= 0 => i as u64,
        Some(_) => return Err(MemoryError::corruption(file_id, "access_count must be a non-negative integer")),
        None => 0,
    };

    let information_type = match take_str(&mut fields, "information_type") {
        Some(raw) => InformationType::parse(&raw)
            .ok_or_else(|| MemoryError::corruption(file_id, format!("unknown information_type: {}", raw)))?,
        None => InformationType::default(),
    };

    let archived = match fields.remove("archived") {
        Some(FrontValue::Bool(b)) => b,
        Some(_) => return Err(MemoryError::corruption(file_id, "archived must be a boolean")),
        None => false,
    };

    let content_hash = take_str(&mut fields, "content_hash").unwrap_or_default();

    if id != file_id {
        warn!("[blocks] File {} declares id {} — using the declared id", file_id, id);
    }

    let mut block = KnowledgeBlock {
        id,
        title,
        body,
        tags: Vec::new(),
        created_at,
        updated_at,
        content_hash,
        access_count,
        last_access,
        information_type,
        archived,
        extra: fields,
    };
    block.set_tags(tags);
    Ok(block)
}

fn parse_timestamp(id: &str, key: &str, raw: &str) -> MemoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::corruption(id, format!("bad timestamp in {}: {}", key, e)))
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlockStore) {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive");
        let store = BlockStore::open(dir.path(), archive).unwrap();
        (dir, store)
    }

    fn sample(id: &str) -> KnowledgeBlock {
        KnowledgeBlock::new(id, "NMN precursor of NAD", "NMN is a direct precursor of NAD+.")
            .with_tags(vec!["nad".into(), "longevity".into()])
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_dir, store) = store();
        let mut block = sample("KB-20260801-001");
        block.extra.insert("source".into(), FrontValue::Str("pubmed".into()));
        block.extra.insert("confidence".into(), FrontValue::Float(0.9));
        store.write(&mut block).unwrap();

        let back = store.read("KB-20260801-001").unwrap();
        assert_eq!(back.title, block.title);
        assert_eq!(back.body, block.body);
        assert_eq!(back.tags, block.tags);
        assert_eq!(back.content_hash, block.content_hash);
        assert_eq!(back.extra.get("source"), Some(&FrontValue::Str("pubmed".into())));
        assert_eq!(back.extra.get("confidence"), Some(&FrontValue::Float(0.9)));
        assert!(!back.archived);
    }

    #[test]
    fn test_title_with_colon_round_trips() {
        let (_dir, store) = store();
        let mut block = KnowledgeBlock::new("KB-1", "Unrelated: macrame patterns", "Knot tying.");
        store.write(&mut block).unwrap();
        let back = store.read("KB-1").unwrap();
        assert_eq!(back.title, "Unrelated: macrame patterns");
    }

    #[test]
    fn test_unknown_keys_preserved_through_rewrite() {
        let (_dir, store) = store();
        let mut block = sample("KB-1");
        block.extra.insert("review_after".into(), FrontValue::Str("2027-01-01".into()));
        store.write(&mut block).unwrap();

        store.record_access("KB-1").unwrap();
        let back = store.read("KB-1").unwrap();
        assert_eq!(back.extra.get("review_after"), Some(&FrontValue::Str("2027-01-01".into())));
        assert_eq!(back.access_count, 1);
    }

    #[test]
    fn test_record_access_does_not_change_hash() {
        let (_dir, store) = store();
        let mut block = sample("KB-1");
        store.write(&mut block).unwrap();
        let hash_before = store.read("KB-1").unwrap().content_hash;

        store.record_access("KB-1").unwrap();
        let after = store.read("KB-1").unwrap();
        assert_eq!(after.content_hash, hash_before);
        assert_eq!(after.access_count, 1);
        assert!(after.last_access >= after.created_at);
    }

    #[test]
    fn test_record_access_missing_block() {
        let (_dir, store) = store();
        assert!(matches!(store.record_access("KB-nope"), Err(MemoryError::NotFound { .. })));
    }

    #[test]
    fn test_tampered_body_detected_as_corruption() {
        let (dir, store) = store();
        let mut block = sample("KB-1");
        store.write(&mut block).unwrap();

        let path = dir.path().join("KB-1.md");
        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("direct precursor", "indirect precursor")).unwrap();

        assert!(matches!(store.read("KB-1"), Err(MemoryError::Corruption { .. })));
    }

    #[test]
    fn test_unparseable_file_is_corruption() {
        let (dir, store) = store();
        fs::write(dir.path().join("KB-9.md"), "no frontmatter here").unwrap();
        assert!(matches!(store.read("KB-9"), Err(MemoryError::Corruption { .. })));
    }

    #[test]
    fn test_missing_required_key_is_corruption() {
        let (dir, store) = store();
        fs::write(dir.path().join("KB-9.md"), "---\nid: KB-9\n---\n\nbody").unwrap();
        let err = store.read("KB-9").unwrap_err();
        assert!(err.to_string().contains("title"), "got: {}", err);
    }

    #[test]
    fn test_inline_tag_list_accepted() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("KB-9.md"),
            "---\nid: KB-9\ntitle: t\ntags: [alpha, beta]\ncreated: 2026-01-01T00:00:00Z\n---\n\nbody",
        )
        .unwrap();
        let block = store.read("KB-9").unwrap();
        assert_eq!(block.tags, vec!["alpha", "beta"]);
        assert_eq!(block.body, "body");
    }

    #[test]
    fn test_archive_and_restore_moves_files() {
        let (dir, store) = store();
        let mut block = sample("KB-1");
        store.write(&mut block).unwrap();

        store.move_to_archive("KB-1").unwrap();
        assert!(!dir.path().join("KB-1.md").exists());
        assert!(dir.path().join("archive/KB-1.md").exists());
        assert!(matches!(store.read("KB-1"), Err(MemoryError::NotFound { .. })));
        assert!(store.read_archived("KB-1").unwrap().archived);
        assert!(store.list().unwrap().is_empty());

        store.restore_from_archive("KB-1").unwrap();
        assert!(dir.path().join("KB-1.md").exists());
        assert!(!dir.path().join("archive/KB-1.md").exists());
        let restored = store.read("KB-1").unwrap();
        assert!(!restored.archived);
        assert_eq!(restored.body, block.body);
    }

    #[test]
    fn test_list_is_sorted_and_skips_archived() {
        let (_dir, store) = store();
        for id in ["KB-20260801-002", "KB-20260801-001", "KB-20260801-003"] {
            let mut block = sample(id);
            store.write(&mut block).unwrap();
        }
        store.move_to_archive("KB-20260801-002").unwrap();
        assert_eq!(store.list().unwrap(), vec!["KB-20260801-001", "KB-20260801-003"]);
        assert_eq!(store.list_archived().unwrap(), vec!["KB-20260801-002"]);
    }

    #[test]
    fn test_generate_id_sequences_and_sees_archive() {
        let (_dir, store) = store();
        let first = store.generate_id().unwrap();
        let day = Utc::now().format("%Y%m%d").to_string();
        assert_eq!(first, format!("KB-{}-001", day));

        let mut block = sample(&first);
        store.write(&mut block).unwrap();
        assert_eq!(store.generate_id().unwrap(), format!("KB-{}-002", day));

        // Archiving the only block must not reset the counter.
        store.move_to_archive(&first).unwrap();
        assert_eq!(store.generate_id().unwrap(), format!("KB-{}-002", day));
    }

    #[test]
    fn test_missing_access_metadata_defaults_to_created() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("KB-9.md"),
            "---\nid: KB-9\ntitle: t\ncreated: 2026-01-01T00:00:00Z\n---\n\nbody",
        )
        .unwrap();
        let block = store.read("KB-9").unwrap();
        assert_eq!(block.access_count, 0);
        assert_eq!(block.last_access, block.created_at);
        assert_eq!(block.updated_at, block.created_at);
    }

    #[test]
    fn test_body_trailing_newline_round_trips() {
        let (_dir, store) = store();
        let mut block = KnowledgeBlock::new("KB-1", "t", "line one.\nline two.\n\n");
        store.write(&mut block).unwrap();
        assert_eq!(block.body, "line one.\nline two.");
        let back = store.read("KB-1").unwrap();
        assert_eq!(back.body, "line one.\nline two.");
        assert_eq!(back.content_hash, block.content_hash);
    }

    #[test]
    fn test_content_hash_ignores_access_metadata() {
        let mut a = sample("KB-1");
        let mut b = sample("KB-1");
        b.access_count = 99;
        b.last_access = Utc::now() + Duration::days(1);
        a.content_hash = content_hash(&a);
        b.content_hash = content_hash(&b);
        assert_eq!(a.content_hash, b.content_hash);

        let mut c = sample("KB-1");
        c.body.push_str(" Changed.");
        assert_ne!(content_hash(&c), a.content_hash);
    }
}
