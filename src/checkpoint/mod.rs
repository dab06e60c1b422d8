//! # Checkpoint Metadata Store
//!
//! The central metadata authority of one rewrite invocation. A checkpoint
//! is a versioned snapshot of a table's block-level metadata, carried as
//! five fixed-schema row batches:
//!
//! | batch         | contents                                              |
//! |---------------|-------------------------------------------------------|
//! | `live`        | blocks currently visible (the live-insert table)      |
//! | `live_txn`    | transaction attribution for `live` (table id, locs)   |
//! | `dropped`     | blocks marked for deletion/replacement                |
//! | `dropped_txn` | transaction attribution for `dropped`                 |
//! | `dropped_log` | row-id / commit-ts log of delete operations           |
//!
//! Column names and order are fixed (see the `ATTR_*` constants); this
//! crate preserves the schema exactly when constructing replacement
//! tables. Per-table contiguous row ranges over the two attribution
//! batches let per-table lookups avoid scanning whole tables; they are
//! recomputed whenever rows are appended or removed.
//!
//! The [`MetaStore`] is the only entity that outlives a single rewrite
//! invocation: it is read via [`CheckpointIo::load_checkpoint`] and
//! written back as a new checkpoint version at the end.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

mod encoding_impls;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use crate::batch::{Batch, BatchError, Column, ColumnData, Value};
use crate::store::{CheckpointIo, StoreError};
use crate::types::{BlockId, BlockLocation, RowId, SoftDeleteSet, Timestamp};
use thiserror::Error;
use tracing::warn;

// ------------------------------------------------------------------------------------------------
// Constants — format version and fixed schema
// ------------------------------------------------------------------------------------------------

/// Current checkpoint metadata format version tag.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Representative row id of the block (head row for promoted blocks).
pub const ATTR_ROW_ID: &str = "row_id";
/// Block identity.
pub const ATTR_BLOCK_ID: &str = "block_id";
/// Whether the block is still open for inserts.
pub const ATTR_APPENDABLE: &str = "appendable";
/// Whether the block's rows are ordered by its sort key.
pub const ATTR_SORTED: &str = "sorted";
/// Owning segment id.
pub const ATTR_SEGMENT: &str = "segment";
/// Location of the block's data payload (`None` = no data).
pub const ATTR_DATA_LOC: &str = "data_loc";
/// Location of the block's tombstone companion (`None` = no deletes).
pub const ATTR_DELTA_LOC: &str = "delta_loc";
/// Commit timestamp of the metadata operation.
pub const ATTR_COMMIT_TS: &str = "commit_ts";
/// Owning table id (attribution batches).
pub const ATTR_TABLE_ID: &str = "table_id";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by checkpoint metadata operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying storage failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A metadata batch does not match the fixed checkpoint schema.
    #[error("metadata schema violation: {0}")]
    Schema(String),

    /// Row-level batch failure.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),
}

// ------------------------------------------------------------------------------------------------
// Table row ranges
// ------------------------------------------------------------------------------------------------

/// Contiguous `[offset, end)` row range of one table within a metadata
/// batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableRowRange {
    pub offset: usize,
    pub end: usize,
}

impl TableRowRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recomputes per-table row ranges from an attribution batch.
///
/// Rows of one table are assumed contiguous; the range of a table id is
/// opened at its first row and extended by every later row carrying it.
pub fn table_ranges(txn: &Batch) -> Result<BTreeMap<u64, TableRowRange>, CheckpointError> {
    let tids = u64_column(txn, ATTR_TABLE_ID)?;
    let mut ranges: BTreeMap<u64, TableRowRange> = BTreeMap::new();
    for (row, &tid) in tids.iter().enumerate() {
        ranges
            .entry(tid)
            .or_insert(TableRowRange {
                offset: row,
                end: row,
            })
            .end += 1;
    }
    Ok(ranges)
}

// ------------------------------------------------------------------------------------------------
// Typed column access
// ------------------------------------------------------------------------------------------------

fn schema_mismatch(name: &str) -> CheckpointError {
    CheckpointError::Schema(format!("column '{name}' missing or mistyped"))
}

/// Location column (`data_loc` / `delta_loc`) of a metadata batch.
pub fn loc_column<'a>(
    batch: &'a Batch,
    name: &str,
) -> Result<&'a [Option<BlockLocation>], CheckpointError> {
    batch
        .column_by_name(name)
        .ok()
        .and_then(|c| c.data.as_locations())
        .ok_or_else(|| schema_mismatch(name))
}

/// Timestamp column of a metadata batch.
pub fn ts_column<'a>(batch: &'a Batch, name: &str) -> Result<&'a [Timestamp], CheckpointError> {
    batch
        .column_by_name(name)
        .ok()
        .and_then(|c| c.data.as_timestamps())
        .ok_or_else(|| schema_mismatch(name))
}

/// Bool column of a metadata batch.
pub fn bool_column<'a>(batch: &'a Batch, name: &str) -> Result<&'a [bool], CheckpointError> {
    batch
        .column_by_name(name)
        .ok()
        .and_then(|c| c.data.as_bools())
        .ok_or_else(|| schema_mismatch(name))
}

/// u64 column of a metadata batch.
pub fn u64_column<'a>(batch: &'a Batch, name: &str) -> Result<&'a [u64], CheckpointError> {
    batch
        .column_by_name(name)
        .ok()
        .and_then(|c| c.data.as_u64s())
        .ok_or_else(|| schema_mismatch(name))
}

/// Block-id column of a metadata batch.
pub fn id_column<'a>(batch: &'a Batch, name: &str) -> Result<&'a [BlockId], CheckpointError> {
    batch
        .column_by_name(name)
        .ok()
        .and_then(|c| c.data.as_block_ids())
        .ok_or_else(|| schema_mismatch(name))
}

// ------------------------------------------------------------------------------------------------
// Fixed batch schemas
// ------------------------------------------------------------------------------------------------

/// Empty batch with the block-metadata schema (`live` / `dropped`).
pub fn block_meta_schema() -> Batch {
    Batch::from_columns(vec![
        Column::new(ATTR_ROW_ID, ColumnData::Row(Vec::new())),
        Column::new(ATTR_BLOCK_ID, ColumnData::Id(Vec::new())),
        Column::new(ATTR_APPENDABLE, ColumnData::Bool(Vec::new())),
        Column::new(ATTR_SORTED, ColumnData::Bool(Vec::new())),
        Column::new(ATTR_SEGMENT, ColumnData::U64(Vec::new())),
        Column::new(ATTR_DATA_LOC, ColumnData::Loc(Vec::new())),
        Column::new(ATTR_DELTA_LOC, ColumnData::Loc(Vec::new())),
        Column::new(ATTR_COMMIT_TS, ColumnData::Ts(Vec::new())),
    ])
    .unwrap_or_default() // empty columns are never ragged
}

/// Empty batch with the attribution schema (`live_txn` / `dropped_txn`).
pub fn block_txn_schema() -> Batch {
    Batch::from_columns(vec![
        Column::new(ATTR_TABLE_ID, ColumnData::U64(Vec::new())),
        Column::new(ATTR_DATA_LOC, ColumnData::Loc(Vec::new())),
        Column::new(ATTR_DELTA_LOC, ColumnData::Loc(Vec::new())),
    ])
    .unwrap_or_default()
}

/// Empty batch with the delete-log schema (`dropped_log`).
pub fn delete_log_schema() -> Batch {
    Batch::from_columns(vec![
        Column::new(ATTR_ROW_ID, ColumnData::Row(Vec::new())),
        Column::new(ATTR_COMMIT_TS, ColumnData::Ts(Vec::new())),
    ])
    .unwrap_or_default()
}

// ------------------------------------------------------------------------------------------------
// MetaStore
// ------------------------------------------------------------------------------------------------

/// The checkpoint's row-oriented metadata tables plus the range index and
/// auxiliary location list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaStore {
    /// Format version tag this store was loaded with.
    pub version: u32,

    /// Live-insert table.
    pub live: Batch,

    /// Attribution for `live`.
    pub live_txn: Batch,

    /// Pending-delete table.
    pub dropped: Batch,

    /// Attribution for `dropped`.
    pub dropped_txn: Batch,

    /// Delete-operation log.
    pub dropped_log: Batch,

    /// Per-table row ranges over `live_txn`.
    pub live_ranges: BTreeMap<u64, TableRowRange>,

    /// Per-table row ranges over `dropped_txn`.
    pub dropped_ranges: BTreeMap<u64, TableRowRange>,

    /// Auxiliary object locations referenced by this checkpoint.
    pub locations: Vec<BlockLocation>,
}

impl MetaStore {
    /// Fresh, empty store with the fixed schema.
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            live: block_meta_schema(),
            live_txn: block_txn_schema(),
            dropped: block_meta_schema(),
            dropped_txn: block_txn_schema(),
            dropped_log: delete_log_schema(),
            live_ranges: BTreeMap::new(),
            dropped_ranges: BTreeMap::new(),
            locations: Vec::new(),
        }
    }

    /// Recomputes both range indexes from the attribution batches.
    pub fn recompute_ranges(&mut self) -> Result<(), CheckpointError> {
        self.live_ranges = table_ranges(&self.live_txn)?;
        self.dropped_ranges = table_ranges(&self.dropped_txn)?;
        Ok(())
    }

    /// Basic shape validation: paired batches must agree on row count.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.live.len() != self.live_txn.len() {
            return Err(CheckpointError::Schema(format!(
                "live table has {} rows but its attribution has {}",
                self.live.len(),
                self.live_txn.len()
            )));
        }
        if self.dropped.len() != self.dropped_txn.len() {
            return Err(CheckpointError::Schema(format!(
                "dropped table has {} rows but its attribution has {}",
                self.dropped.len(),
                self.dropped_txn.len()
            )));
        }
        if self.dropped.len() != self.dropped_log.len() {
            return Err(CheckpointError::Schema(format!(
                "dropped table has {} rows but the delete log has {}",
                self.dropped.len(),
                self.dropped_log.len()
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Promoted-block identity overwrite
// ------------------------------------------------------------------------------------------------

/// Rewrites row `row` of a metadata batch (and its attribution batch) to
/// carry a freshly promoted block's identity: head row id, new block id,
/// sealed state, sort flag, segment, the new data location, and no
/// tombstone companion.
pub fn overwrite_block_identity(
    meta: &mut Batch,
    txn: &mut Batch,
    row: usize,
    block_id: BlockId,
    location: BlockLocation,
    sorted: bool,
) -> Result<(), CheckpointError> {
    meta.update(ATTR_ROW_ID, row, Value::Row(RowId::head(block_id)))?;
    meta.update(ATTR_BLOCK_ID, row, Value::Id(block_id))?;
    meta.update(ATTR_APPENDABLE, row, Value::Bool(false))?;
    meta.update(ATTR_SORTED, row, Value::Bool(sorted))?;
    meta.update(ATTR_SEGMENT, row, Value::U64(block_id.name.segment))?;
    meta.update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
    meta.update(ATTR_DELTA_LOC, row, Value::Loc(None))?;
    txn.update(ATTR_DATA_LOC, row, Value::Loc(Some(location)))?;
    txn.update(ATTR_DELTA_LOC, row, Value::Loc(None))?;

    if !sorted {
        warn!(block = %block_id, "promoted block is not sorted");
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Checkpoint entry listing
// ------------------------------------------------------------------------------------------------

/// Loads a checkpoint and lists every object location it references: the
/// checkpoint's own location, the store's auxiliary locations, and every
/// non-empty data/delta location in the live and dropped tables.
///
/// When `soft_deletes` is supplied, every block referenced from the
/// dropped table's data-location column is recorded in it, so that a
/// subsequent rewrite pass over an *earlier* checkpoint in the chain
/// skips blocks this checkpoint already supersedes.
pub fn load_checkpoint_entries<S>(
    src: &S,
    loc: &BlockLocation,
    version: u32,
    mut soft_deletes: Option<&mut SoftDeleteSet>,
) -> Result<(Vec<BlockLocation>, MetaStore), CheckpointError>
where
    S: CheckpointIo + ?Sized,
{
    let store = src.load_checkpoint(loc, version)?;
    store.validate()?;

    let mut locations = Vec::with_capacity(1 + store.locations.len());
    locations.push(*loc);
    locations.extend(store.locations.iter().copied());

    let live_data = loc_column(&store.live, ATTR_DATA_LOC)?;
    let live_delta = loc_column(&store.live, ATTR_DELTA_LOC)?;
    for row in 0..store.live.len() {
        if let Some(data_loc) = live_data[row] {
            locations.push(data_loc);
        }
        if let Some(delta_loc) = live_delta[row] {
            locations.push(delta_loc);
        }
    }

    let dropped_data = loc_column(&store.dropped, ATTR_DATA_LOC)?;
    let dropped_delta = loc_column(&store.dropped, ATTR_DELTA_LOC)?;
    for row in 0..store.dropped.len() {
        if let Some(data_loc) = dropped_data[row] {
            locations.push(data_loc);
            if let Some(soft) = soft_deletes.as_deref_mut() {
                soft.insert(data_loc.name, data_loc.block);
            }
        }
        if let Some(delta_loc) = dropped_delta[row] {
            locations.push(delta_loc);
        }
    }

    Ok((locations, store))
}
