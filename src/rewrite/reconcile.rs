//! Metadata Reconciliation.
//!
//! Rebuilds the live-insert table from scratch: every original live row
//! is copied over, and behind the rows of each table that has pending
//! promotions, the corresponding dropped-side rows are appended and
//! rewritten to the promoted identity. Promotions whose table id never
//! appears in the live table are appended in a second pass. Applied
//! rows are then compacted out of all three delete-side batches and the
//! per-table row ranges recomputed.

use std::collections::BTreeSet;

use super::RewriteError;
use super::promote::PendingPromotions;
use crate::checkpoint::{ATTR_TABLE_ID, MetaStore, overwrite_block_identity, u64_column};
use tracing::debug;

pub fn reconcile(
    store: &mut MetaStore,
    promotions: &mut PendingPromotions,
) -> Result<(), RewriteError> {
    if promotions.is_empty() {
        return Ok(());
    }

    let mut new_live = store.live.empty_like();
    let mut new_live_txn = store.live_txn.empty_like();
    let table_ids = u64_column(&store.live_txn, ATTR_TABLE_ID)?.to_vec();

    for row in 0..store.live.len() {
        new_live.push_row_from(&store.live, row)?;
        new_live_txn.push_row_from(&store.live_txn, row)?;

        if let Some(blocks) = promotions.by_table.get_mut(&table_ids[row]) {
            for block in blocks.iter_mut().filter(|b| !b.applied) {
                block.applied = true;
                new_live.push_row_from(&store.dropped, block.dropped_row)?;
                new_live_txn.push_row_from(&store.dropped_txn, block.dropped_row)?;
                let appended = new_live.len() - 1;
                if let (Some(location), Some(id)) = (block.location, block.block_id) {
                    overwrite_block_identity(
                        &mut new_live,
                        &mut new_live_txn,
                        appended,
                        id,
                        location,
                        block.sorted,
                    )?;
                }
            }
        }
    }

    // Promotions for tables absent from the live table.
    for blocks in promotions.by_table.values_mut() {
        for block in blocks.iter_mut().filter(|b| !b.applied) {
            block.applied = true;
            new_live.push_row_from(&store.dropped, block.dropped_row)?;
            new_live_txn.push_row_from(&store.dropped_txn, block.dropped_row)?;
            let appended = new_live.len() - 1;
            if let (Some(location), Some(id)) = (block.location, block.block_id) {
                overwrite_block_identity(
                    &mut new_live,
                    &mut new_live_txn,
                    appended,
                    id,
                    location,
                    block.sorted,
                )?;
            }
        }
    }

    // Compact every applied promotion's rows out of the delete side.
    let mut removed = BTreeSet::new();
    for blocks in promotions.by_table.values() {
        for block in blocks.iter().filter(|b| b.applied) {
            removed.extend(block.compact_rows.iter().copied());
        }
    }
    let removed: Vec<usize> = removed.into_iter().collect();
    store.dropped.remove_rows(&removed)?;
    store.dropped_txn.remove_rows(&removed)?;
    store.dropped_log.remove_rows(&removed)?;

    debug!(
        live = new_live.len(),
        migrated = promotions.total(),
        compacted = removed.len(),
        "reconciled metadata tables"
    );
    store.live = new_live;
    store.live_txn = new_live_txn;
    store.recompute_ranges()?;
    Ok(())
}
