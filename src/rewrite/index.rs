//! Object Indexer.
//!
//! Groups checkpoint metadata rows by the physical object and block they
//! reference, producing one [`BlockEntry`] per (object, block index) pair
//! annotated with the metadata rows pointing at it. The resulting
//! [`ObjectIndex`] is the arena every later phase works on: descriptors
//! are looked up by key and mutated in place through the index, never
//! through aliased references, and loaded row buffers live in the arena
//! until a write consumes them or the invocation ends.

use std::collections::BTreeMap;

use super::RewriteError;
use crate::checkpoint::{
    ATTR_APPENDABLE, ATTR_BLOCK_ID, ATTR_COMMIT_TS, ATTR_DATA_LOC, ATTR_DELTA_LOC, ATTR_TABLE_ID,
    MetaStore, bool_column, id_column, loc_column, ts_column, u64_column,
};
use crate::batch::Batch;
use crate::types::{BlockId, BlockKind, BlockLocation, ObjectName, SoftDeleteSet, Timestamp};
use tracing::debug;

/// Arena key of one block descriptor.
pub type BlockKey = (ObjectName, u16);

// ------------------------------------------------------------------------------------------------
// Descriptors
// ------------------------------------------------------------------------------------------------

/// One physical block under rewrite consideration.
#[derive(Debug)]
pub struct BlockEntry {
    /// Block index within its object.
    pub index: u16,

    /// Live-table row indices referencing this block.
    pub insert_rows: Vec<usize>,

    /// Dropped-table row indices referencing this block.
    pub delete_rows: Vec<usize>,

    pub kind: BlockKind,
    pub location: BlockLocation,

    /// Row data, populated by the trim pass.
    pub data: Option<Batch>,

    /// Declared sort-key column, discovered by the trim pass.
    pub sort_key: Option<u16>,

    /// Whether the referencing metadata row flags the block appendable.
    pub appendable: bool,

    /// Identity of the block as referenced by tombstone entries.
    pub block_id: BlockId,

    /// Owning table id.
    pub table_id: u64,

    /// Arena key of the paired tombstone block, if any.
    pub tombstone: Option<BlockKey>,
}

/// One physical object file under rewrite.
#[derive(Debug)]
pub struct ObjectEntry {
    pub name: ObjectName,

    /// Blocks keyed by index within the object.
    pub blocks: BTreeMap<u16, BlockEntry>,

    /// Set by the trim pass when any contained block was cut.
    pub changed: bool,

    /// The object was first seen from the delete-side table.
    pub delete_batch: bool,

    /// The object was first seen through an appendable reference.
    pub appendable: bool,
}

impl ObjectEntry {
    /// Index of the lowest-numbered block.
    pub fn first_block_index(&self) -> Option<u16> {
        self.blocks.keys().next().copied()
    }

    /// Kind of the lowest-numbered block.
    pub fn first_block_kind(&self) -> Option<BlockKind> {
        self.blocks.values().next().map(|b| b.kind)
    }
}

// ------------------------------------------------------------------------------------------------
// ObjectIndex
// ------------------------------------------------------------------------------------------------

/// Arena of object / block descriptors for one rewrite invocation.
///
/// Keyed by object name so iteration order is deterministic.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    pub objects: BTreeMap<ObjectName, ObjectEntry>,
}

impl ObjectIndex {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks up one block descriptor by arena key.
    pub fn block(&self, key: &BlockKey) -> Option<&BlockEntry> {
        self.objects.get(&key.0).and_then(|o| o.blocks.get(&key.1))
    }

    /// Mutable lookup by arena key.
    pub fn block_mut(&mut self, key: &BlockKey) -> Option<&mut BlockEntry> {
        self.objects
            .get_mut(&key.0)
            .and_then(|o| o.blocks.get_mut(&key.1))
    }

    fn add(
        &mut self,
        location: BlockLocation,
        appendable: bool,
        from_delete_side: bool,
        row: usize,
        table_id: u64,
        block_id: BlockId,
        kind: BlockKind,
    ) {
        let object = self.objects.entry(location.name).or_insert_with(|| ObjectEntry {
            name: location.name,
            blocks: BTreeMap::new(),
            changed: false,
            delete_batch: from_delete_side,
            appendable,
        });
        let entry = object.blocks.entry(location.block).or_insert_with(|| BlockEntry {
            index: location.block,
            insert_rows: Vec::new(),
            delete_rows: Vec::new(),
            kind,
            location,
            data: None,
            sort_key: None,
            appendable,
            block_id,
            table_id,
            tombstone: None,
        });
        if from_delete_side {
            entry.delete_rows.push(row);
        } else {
            entry.insert_rows.push(row);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Index construction
// ------------------------------------------------------------------------------------------------

/// Builds the object index from a loaded checkpoint.
///
/// Delete-side rows are walked first, then live rows. Blocks already in
/// `soft_deletes` were reconciled by a previous pass over a later
/// checkpoint and are skipped entirely.
pub fn build_index(
    store: &MetaStore,
    watermark: Timestamp,
    soft_deletes: &SoftDeleteSet,
) -> Result<ObjectIndex, RewriteError> {
    let mut index = ObjectIndex::default();

    let data_locs = loc_column(&store.dropped, ATTR_DATA_LOC)?;
    let delta_locs = loc_column(&store.dropped, ATTR_DELTA_LOC)?;
    let appendables = bool_column(&store.dropped, ATTR_APPENDABLE)?;
    let commit_ts = ts_column(&store.dropped, ATTR_COMMIT_TS)?;
    let block_ids = id_column(&store.dropped, ATTR_BLOCK_ID)?;
    let table_ids = u64_column(&store.dropped_txn, ATTR_TABLE_ID)?;
    for row in 0..store.dropped.len() {
        if commit_ts[row] < watermark {
            return Err(RewriteError::Invariant(format!(
                "dropped row {row} committed at {} before watermark {watermark}",
                commit_ts[row]
            )));
        }

        if let Some(data_loc) = data_locs[row] {
            if soft_deletes.contains(&data_loc.name, data_loc.block) {
                debug!(location = %data_loc, "skipping soft-deleted block");
                continue;
            }
        }

        let appendable = appendables[row];
        if let Some(delta_loc) = delta_locs[row] {
            index.add(
                delta_loc,
                appendable,
                true,
                row,
                table_ids[row],
                block_ids[row],
                BlockKind::Tombstone,
            );
        }
        if let Some(data_loc) = data_locs[row] {
            index.add(
                data_loc,
                appendable,
                true,
                row,
                table_ids[row],
                block_ids[row],
                BlockKind::Data,
            );
            if appendable {
                if let Some(delta_loc) = delta_locs[row] {
                    if let Some(entry) = index.block_mut(&(data_loc.name, data_loc.block)) {
                        entry.tombstone = Some((delta_loc.name, delta_loc.block));
                    }
                }
            }
        }
    }

    let data_locs = loc_column(&store.live, ATTR_DATA_LOC)?;
    let delta_locs = loc_column(&store.live, ATTR_DELTA_LOC)?;
    let appendables = bool_column(&store.live, ATTR_APPENDABLE)?;
    let block_ids = id_column(&store.live, ATTR_BLOCK_ID)?;
    let table_ids = u64_column(&store.live_txn, ATTR_TABLE_ID)?;
    for row in 0..store.live.len() {
        if appendables[row] {
            return Err(RewriteError::Invariant(format!(
                "live row {row} references appendable block {}",
                block_ids[row]
            )));
        }
        if let Some(data_loc) = data_locs[row] {
            index.add(
                data_loc,
                false,
                false,
                row,
                table_ids[row],
                block_ids[row],
                BlockKind::Data,
            );
        }
        if let Some(delta_loc) = delta_locs[row] {
            index.add(
                delta_loc,
                false,
                false,
                row,
                table_ids[row],
                block_ids[row],
                BlockKind::Tombstone,
            );
        }
    }

    debug!(objects = index.objects.len(), "indexed checkpoint objects");
    Ok(index)
}
