// ── Decay Manager ──────────────────────────────────────────────────────────
//
// Lifecycle policy over access metadata: blocks that have gone cold (by
// wall-clock or by share of total accesses) are archived — vector entry
// deleted first, then the file relocated under archive/. Relationships are
// left in place; they are hidden while an endpoint is archived and come
// back with a restore.
//
// The ordering in `archive_block` is deliberate: deleting the vector entry
// before moving the file means a crash in between can leave a live block
// without an index entry (re-encodable), never an archived block that is
// still retrievable.

use chrono::{Duration, Utc};
use log::{info, warn};

use crate::atoms::error::MemoryResult;
use crate::atoms::types::{DecayConfig, DecayParams, DecayPolicy};
use crate::engine::blocks::BlockStore;
use crate::engine::vector::VectorStore;

/// Evaluate `policy` over the whole catalogue; returns the archived ids in
/// catalogue order.
pub fn run_decay(
    blocks: &BlockStore,
    vectors: &dyn VectorStore,
    policy: DecayPolicy,
    params: &DecayParams,
    config: &DecayConfig,
) -> MemoryResult<Vec<String>> {
    let threshold_days = params.time_threshold_days.unwrap_or(config.time_threshold_days);
    let usage_threshold = params.usage_threshold.unwrap_or(config.usage_threshold);

    let ids = blocks.list()?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    // One read pass up front: the usage ratio needs the access total before
    // any archive decision can be made.
    let mut loaded = Vec::with_capacity(ids.len());
    for id in &ids {
        match blocks.read(id) {
            Ok(block) => loaded.push(block),
            Err(e) => warn!("[decay] Skipping unreadable block {}: {}", id, e),
        }
    }
    let total_accesses: u64 = loaded.iter().map(|b| b.access_count).sum();
    let cutoff = Utc::now() - Duration::days(threshold_days);

    let mut archived = Vec::new();
    for block in &loaded {
        let time_due = block.last_access < cutoff;
        let usage_ratio = block.access_count as f64 / (total_accesses.max(1)) as f64;
        let usage_due = usage_ratio < usage_threshold;

        let due = match policy {
            DecayPolicy::Time => time_due,
            DecayPolicy::Usage => usage_due,
            DecayPolicy::Both => time_due || usage_due,
        };
        if !due {
            continue;
        }

        if time_due {
            info!(
                "[decay] Archiving {}: last accessed {} (> {} days ago)",
                block.id,
                block.last_access.format("%Y-%m-%d"),
                threshold_days
            );
        } else {
            info!(
                "[decay] Archiving {}: usage ratio {:.4} < {:.4}",
                block.id, usage_ratio, usage_threshold
            );
        }

        if archive_block(blocks, vectors, &block.id) {
            archived.push(block.id.clone());
        }
    }

    info!("[decay] Policy {:?} archived {} of {} blocks", policy, archived.len(), loaded.len());
    Ok(archived)
}

/// Vector entry out first, then the file move. Returns false (with a
/// warning) when either step failed; a block is only reported archived when
/// both succeeded.
fn archive_block(blocks: &BlockStore, vectors: &dyn VectorStore, id: &str) -> bool {
    match vectors.delete(id) {
        Ok(_) => {}
        Err(e) => {
            warn!("[decay] Vector delete failed for {}, leaving block live: {}", id, e);
            return false;
        }
    }
    match blocks.move_to_archive(id) {
        Ok(()) => true,
        Err(e) => {
            warn!("[decay] Archive move failed for {}: {}", id, e);
            false
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
