//! Rewrite Engine: in-place object rewrites, block promotion, and the
//! delete applier.
//!
//! Objects are processed in name order; within an object, blocks in
//! ascending index order so extents keep mapping back to metadata rows.
//! Two mutually exclusive write paths per object:
//!
//! - **In-place rewrite** for objects the trim pass changed (or whose
//!   only content is a tombstone batch): trimmed blocks are rewritten
//!   under the same object name.
//! - **Promotion** for delete-batch objects whose first block is data:
//!   an appendable block that must survive the watermark has its paired
//!   tombstone applied, is sorted by its declared key, stripped of its
//!   bookkeeping columns, and written sealed under a derived name. A
//!   sealed delete-batch object is instead migrated row-by-row with no
//!   new location.
//!
//! Every object that did not take the promotion path has its block
//! locations folded back into the metadata tables, using the freshly
//! written extent when an in-place rewrite occurred.

use std::collections::{BTreeMap, BTreeSet};

use super::RewriteError;
use super::index::ObjectIndex;
use super::trim::BOOKKEEPING_COLUMNS;
use crate::batch::{Batch, Value};
use crate::checkpoint::{ATTR_DATA_LOC, ATTR_DELTA_LOC, MetaStore};
use crate::store::{BlockStore, WriteBlock, WrittenObject};
use crate::types::{BlockId, BlockKind, BlockLocation, ObjectName};
use tracing::{debug, warn};

// ------------------------------------------------------------------------------------------------
// Pending promotions
// ------------------------------------------------------------------------------------------------

/// One block relocation awaiting reconciliation.
#[derive(Debug)]
pub struct PromotedBlock {
    /// Dropped-table row to migrate into the live table.
    pub dropped_row: usize,

    /// New location of the promoted block; `None` for the sealed
    /// migration path, which keeps the original location columns.
    pub location: Option<BlockLocation>,

    /// Identity of the promoted block, when a new one was written.
    pub block_id: Option<BlockId>,

    /// Whether the promoted rows are ordered by the declared sort key.
    pub sorted: bool,

    /// Set once reconciliation has migrated this entry.
    pub applied: bool,

    /// Dropped-table rows to compact away once applied.
    pub compact_rows: Vec<usize>,
}

/// Relocations recorded by the rewrite phase, keyed by owning table id so
/// reconciliation appends them in deterministic table order.
#[derive(Debug, Default)]
pub struct PendingPromotions {
    pub by_table: BTreeMap<u64, Vec<PromotedBlock>>,
}

impl PendingPromotions {
    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    /// Total number of recorded relocations.
    pub fn total(&self) -> usize {
        self.by_table.values().map(Vec::len).sum()
    }

    fn add(&mut self, table_id: u64, block: PromotedBlock) {
        self.by_table.entry(table_id).or_default().push(block);
    }
}

// ------------------------------------------------------------------------------------------------
// Delete applier
// ------------------------------------------------------------------------------------------------

/// Physically removes from `data` every row whose offset appears in the
/// paired tombstone batch under the target block's id. No-op without a
/// tombstone.
pub fn apply_delete(
    data: &mut Batch,
    tombstone: Option<&Batch>,
    target: BlockId,
) -> Result<(), RewriteError> {
    let Some(tombstone) = tombstone else {
        return Ok(());
    };
    let row_ids = tombstone
        .column(0)?
        .data
        .as_row_ids()
        .ok_or_else(|| RewriteError::Invariant("tombstone block lacks a row-id column".into()))?;

    let mut offsets = BTreeSet::new();
    for row_id in row_ids {
        if row_id.block == target {
            offsets.insert(row_id.offset as usize);
        }
    }
    if offsets.is_empty() {
        return Ok(());
    }
    let remove: Vec<usize> = offsets.into_iter().filter(|&o| o < data.len()).collect();
    debug!(block = %target, removed = remove.len(), "applied tombstone to data block");
    data.remove_rows(&remove)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Write helper
// ------------------------------------------------------------------------------------------------

/// Writes an object, recovering from a destination collision by deleting
/// the stale object and retrying exactly once.
fn write_object_with_retry<D>(
    dst: &D,
    name: &ObjectName,
    blocks: &[WriteBlock],
) -> Result<WrittenObject, RewriteError>
where
    D: BlockStore + ?Sized,
{
    match dst.write_blocks(name, blocks) {
        Ok(written) => Ok(written),
        Err(err) if err.is_already_exists() => {
            warn!(object = %name, "destination exists, deleting and retrying");
            dst.delete_object(name)?;
            Ok(dst.write_blocks(name, blocks)?)
        }
        Err(err) => Err(err.into()),
    }
}

// ------------------------------------------------------------------------------------------------
// Object rewrite loop
// ------------------------------------------------------------------------------------------------

/// Rewrites every changed or delete-batch object and folds the resulting
/// locations back into the metadata tables. Returns the promotions for
/// reconciliation and the names of newly written promotion objects.
pub fn rewrite_objects<S, D>(
    src: &S,
    dst: &D,
    index: &mut ObjectIndex,
    store: &mut MetaStore,
) -> Result<(PendingPromotions, Vec<String>), RewriteError>
where
    S: BlockStore + ?Sized,
    D: BlockStore + ?Sized,
{
    let mut promotions = PendingPromotions::default();
    let mut files = Vec::new();

    let names: Vec<ObjectName> = index.objects.keys().copied().collect();
    for name in names {
        let (changed, delete_batch, appendable, first_kind, mut block_indices) = {
            let object = index
                .objects
                .get(&name)
                .ok_or_else(|| RewriteError::Invariant(format!("object {name} vanished from the index")))?;
            (
                object.changed,
                object.delete_batch,
                object.appendable,
                object.first_block_kind(),
                object.blocks.keys().copied().collect::<Vec<u16>>(),
            )
        };
        if !changed && !delete_batch {
            continue;
        }
        // Ordering-sensitive from here on.
        block_indices.sort_unstable();

        let in_place = changed && (!delete_batch || first_kind == Some(BlockKind::Tombstone));
        let promotion = delete_batch && first_kind == Some(BlockKind::Data);

        let mut written: Option<WrittenObject> = None;
        if in_place {
            let mut blocks = Vec::with_capacity(block_indices.len());
            {
                let object = index
                    .objects
                    .get_mut(&name)
                    .ok_or_else(|| RewriteError::Invariant(format!("object {name} vanished from the index")))?;
                for &bi in &block_indices {
                    let entry = object.blocks.get_mut(&bi).ok_or_else(|| {
                        RewriteError::Invariant(format!("block {name}-{bi} vanished from the index"))
                    })?;
                    // A promotion later in the loop may still read this
                    // batch through its tombstone key, so tombstones
                    // stay in the arena and the write takes a copy.
                    let batch = match entry.kind {
                        BlockKind::Tombstone => entry.data.clone(),
                        BlockKind::Data => entry.data.take(),
                    }
                    .ok_or_else(|| {
                        RewriteError::Invariant(format!("block {name}-{bi} was never trimmed"))
                    })?;
                    blocks.push(WriteBlock {
                        index: bi,
                        kind: entry.kind,
                        sort_key: entry.sort_key,
                        appendable: entry.appendable,
                        batch,
                    });
                }
            }
            written = Some(write_object_with_retry(dst, &name, &blocks)?);
            debug!(object = %name, blocks = blocks.len(), "rewrote object in place");
        }

        if promotion {
            if appendable {
                promote_object(src, dst, index, &name, &block_indices, &mut promotions, &mut files)?;
            } else {
                migrate_object(index, &name, &block_indices, &mut promotions)?;
            }
            continue;
        }

        relocate_rows(index, store, &name, &block_indices, changed, written.as_ref())?;
    }

    Ok((promotions, files))
}

/// Promotes the surviving appendable block of a delete-batch object into
/// a new sealed block under a derived name.
fn promote_object<S, D>(
    src: &S,
    dst: &D,
    index: &mut ObjectIndex,
    name: &ObjectName,
    block_indices: &[u16],
    promotions: &mut PendingPromotions,
    files: &mut Vec<String>,
) -> Result<(), RewriteError>
where
    S: BlockStore + ?Sized,
    D: BlockStore + ?Sized,
{
    if block_indices.len() > 2 {
        return Err(RewriteError::Invariant(format!(
            "promotion object {name} has {} blocks",
            block_indices.len()
        )));
    }
    let first = block_indices
        .first()
        .copied()
        .ok_or_else(|| RewriteError::Invariant(format!("promotion object {name} has no blocks")))?;

    let (mut batch, sort_key, block_id, table_id, delete_rows, tombstone_key, location) = {
        let entry = index
            .block_mut(&(*name, first))
            .ok_or_else(|| RewriteError::Invariant(format!("block {name}-{first} vanished from the index")))?;
        (
            entry
                .data
                .take()
                .ok_or_else(|| RewriteError::Invariant(format!("block {name}-{first} was never trimmed")))?,
            entry.sort_key,
            entry.block_id,
            entry.table_id,
            entry.delete_rows.clone(),
            entry.tombstone,
            entry.location,
        )
    };

    let tombstone_batch = tombstone_key
        .and_then(|key| index.block(&key))
        .and_then(|entry| entry.data.as_ref());
    apply_delete(&mut batch, tombstone_batch, block_id)?;

    if let Some(key) = sort_key {
        src.sort_rows(&mut batch, key as usize)?;
    }
    batch.drop_tail_columns(BOOKKEEPING_COLUMNS);

    let new_name = location.name.promoted().ok_or_else(|| {
        RewriteError::Invariant(format!(
            "object {} has no room in the promoted name range",
            location.name
        ))
    })?;
    let blocks = [WriteBlock {
        index: 0,
        kind: BlockKind::Data,
        sort_key,
        appendable: false,
        batch,
    }];
    let object = write_object_with_retry(dst, &new_name, &blocks)?;
    files.push(new_name.to_string());

    let handle = object
        .handles
        .first()
        .copied()
        .ok_or_else(|| RewriteError::Invariant(format!("promotion write to {new_name} produced no blocks")))?;
    let new_location = BlockLocation::new(new_name, handle.index, object.extent, handle.rows);
    let new_id = BlockId::new(new_name, handle.index);
    let dropped_row = delete_rows
        .first()
        .copied()
        .ok_or_else(|| RewriteError::Invariant(format!("promotion block {name}-{first} has no dropped rows")))?;
    debug!(block = %block_id, promoted = %new_id, rows = handle.rows, "promoted appendable block");
    promotions.add(
        table_id,
        PromotedBlock {
            dropped_row,
            location: Some(new_location),
            block_id: Some(new_id),
            sorted: sort_key.is_some(),
            applied: false,
            compact_rows: delete_rows,
        },
    );
    Ok(())
}

/// Migrates a sealed delete-batch object: every block's dropped row is
/// queued for re-insertion with its original location columns intact.
fn migrate_object(
    index: &mut ObjectIndex,
    name: &ObjectName,
    block_indices: &[u16],
    promotions: &mut PendingPromotions,
) -> Result<(), RewriteError> {
    let object = index
        .objects
        .get_mut(name)
        .ok_or_else(|| RewriteError::Invariant(format!("object {name} vanished from the index")))?;
    let table_id = object
        .blocks
        .values()
        .next()
        .map(|b| b.table_id)
        .ok_or_else(|| RewriteError::Invariant(format!("migration object {name} has no blocks")))?;
    for &bi in block_indices {
        let entry = object.blocks.get_mut(&bi).ok_or_else(|| {
            RewriteError::Invariant(format!("block {name}-{bi} vanished from the index"))
        })?;
        drop(entry.data.take());
        let dropped_row = entry.delete_rows.last().copied().ok_or_else(|| {
            RewriteError::Invariant(format!("migration block {name}-{bi} has no dropped rows"))
        })?;
        promotions.add(
            table_id,
            PromotedBlock {
                dropped_row,
                location: None,
                block_id: None,
                sorted: true,
                applied: false,
                compact_rows: entry.delete_rows.clone(),
            },
        );
    }
    Ok(())
}

/// Folds a visited object's block locations back into the metadata
/// tables, substituting the freshly written extent when the object was
/// rewritten in place.
fn relocate_rows(
    index: &ObjectIndex,
    store: &mut MetaStore,
    name: &ObjectName,
    block_indices: &[u16],
    changed: bool,
    written: Option<&WrittenObject>,
) -> Result<(), RewriteError> {
    let object = index
        .objects
        .get(name)
        .ok_or_else(|| RewriteError::Invariant(format!("object {name} vanished from the index")))?;

    for (i, &bi) in block_indices.iter().enumerate() {
        let entry = object.blocks.get(&bi).ok_or_else(|| {
            RewriteError::Invariant(format!("block {name}-{bi} vanished from the index"))
        })?;
        let location = if changed {
            let written = written.ok_or_else(|| {
                RewriteError::Invariant(format!("changed object {name} was never rewritten"))
            })?;
            let handle = written.handles.get(i).copied().ok_or_else(|| {
                RewriteError::Invariant(format!("object {name} write is missing block {bi}"))
            })?;
            BlockLocation::new(*name, bi, written.extent, handle.rows)
        } else {
            entry.location
        };

        match entry.kind {
            BlockKind::Data => {
                for &row in &entry.insert_rows {
                    store.live.update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
                    store
                        .live_txn
                        .update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
                }
                if entry.appendable {
                    for &row in &entry.delete_rows {
                        store
                            .dropped
                            .update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
                        store
                            .dropped_txn
                            .update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
                    }
                }
            }
            BlockKind::Tombstone => {
                for &row in &entry.insert_rows {
                    store
                        .live
                        .update(ATTR_DELTA_LOC, row, Value::Loc(Some(location)))?;
                    store
                        .live_txn
                        .update(ATTR_DELTA_LOC, row, Value::Loc(Some(location)))?;
                }
                for &row in &entry.delete_rows {
                    store
                        .dropped
                        .update(ATTR_DELTA_LOC, row, Value::Loc(Some(location)))?;
                    store
                        .dropped_txn
                        .update(ATTR_DELTA_LOC, row, Value::Loc(Some(location)))?;
                }
            }
        }
    }
    Ok(())
}
