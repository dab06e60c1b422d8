//! Trim Engine.
//!
//! Walks every indexed block and cuts its row data back to the watermark:
//! tombstone rows committed after the watermark are excluded one by one,
//! data blocks (whose rows are physically ordered by commit time) are
//! truncated at the first row past the watermark. Sealed data blocks are
//! never loaded; they cannot contain rows past the watermark of a valid
//! invocation.
//!
//! Every visited block's batch stays in the arena for the rewrite phase,
//! reformatted to the canonical `col_N` attribute naming the block writer
//! expects.

use super::RewriteError;
use super::index::ObjectIndex;
use crate::batch::Batch;
use crate::store::BlockStore;
use crate::types::{BlockKind, Timestamp};
use tracing::debug;

/// Offset from the last column to the commit-timestamp bookkeeping column.
///
/// Both data and tombstone blocks end in `[row_id, commit_ts, aborted]`.
const COMMIT_TS_FROM_END: usize = 2;

/// Number of bookkeeping columns stripped when a block is sealed.
pub const BOOKKEEPING_COLUMNS: usize = 3;

fn commit_ts_at(batch: &Batch, row: usize) -> Result<Timestamp, RewriteError> {
    let columns = batch.num_columns();
    let index = columns
        .checked_sub(COMMIT_TS_FROM_END)
        .ok_or_else(|| RewriteError::Invariant(format!("block has only {columns} columns")))?;
    let col = batch.column(index)?;
    let ts = col
        .data
        .as_timestamps()
        .ok_or_else(|| RewriteError::Invariant(format!("column '{}' is not a commit-timestamp column", col.name)))?;
    Ok(ts[row])
}

/// Trims every indexed block against the watermark.
///
/// Returns true if any block anywhere was cut; false means the checkpoint
/// is unchanged and the caller short-circuits.
pub fn trim_objects<S>(
    store: &S,
    index: &mut ObjectIndex,
    watermark: Timestamp,
) -> Result<bool, RewriteError>
where
    S: BlockStore + ?Sized,
{
    let mut checkpoint_changed = false;
    for object in index.objects.values_mut() {
        let mut object_changed = false;
        for entry in object.blocks.values_mut() {
            if !entry.appendable && entry.kind == BlockKind::Data {
                continue;
            }

            let mut batch;
            match entry.kind {
                BlockKind::Tombstone => {
                    batch = store.read_block(&entry.location, BlockKind::Tombstone)?;
                    let mut keep = Vec::with_capacity(batch.len());
                    for row in 0..batch.len() {
                        if commit_ts_at(&batch, row)? > watermark {
                            debug!(
                                row,
                                location = %entry.location,
                                "tombstone row past watermark"
                            );
                            object_changed = true;
                            checkpoint_changed = true;
                        } else {
                            keep.push(row);
                        }
                    }
                    if keep.len() != batch.len() {
                        batch.shrink(&keep)?;
                    }
                }
                BlockKind::Data => {
                    let meta = store.read_block_meta(&entry.location)?;
                    entry.sort_key = if meta.appendable { meta.sort_key } else { None };
                    batch = store.read_block(&entry.location, BlockKind::Data)?;
                    for row in 0..batch.len() {
                        if commit_ts_at(&batch, row)? > watermark {
                            debug!(
                                row,
                                location = %entry.location,
                                "truncating data block at watermark"
                            );
                            batch.truncate(row);
                            object_changed = true;
                            checkpoint_changed = true;
                            break;
                        }
                    }
                }
            }

            if !batch.is_empty() {
                batch.normalize_columns();
            }
            entry.data = Some(batch);
        }
        object.changed = object_changed;
    }
    Ok(checkpoint_changed)
}
