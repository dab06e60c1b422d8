//! # Core Value Types
//!
//! Identity and addressing types shared by every rewrite phase:
//!
//! - [`Timestamp`] — the logical commit clock; the backup watermark and
//!   every row's commit time are instances.
//! - [`ObjectName`] — identifies one physical object file.
//! - [`BlockLocation`] — (object, block index, byte extent, row count);
//!   an immutable value type compared by content.
//! - [`BlockId`] / [`RowId`] — block and row identity as referenced by
//!   tombstone entries.
//! - [`BlockKind`] — data payload vs. tombstone block.
//! - [`BlockMeta`] — sort-key / appendability descriptor loaded without
//!   row data.
//! - [`SoftDeleteSet`] — blocks already superseded by an earlier rewrite
//!   pass, to be skipped by later passes over a checkpoint chain.

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

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Block-file number offset for promoted (sealed-from-appendable) blocks.
///
/// A promotion writes a brand-new object under the same segment with its
/// file number shifted into this reserved range, so the new name can never
/// collide with live numbering.
pub const ABLOCK_NUM_OFFSET: u16 = 1000;

// ------------------------------------------------------------------------------------------------
// Timestamp
// ------------------------------------------------------------------------------------------------

/// Logical commit timestamp.
///
/// Totally ordered. A row is visible at watermark `w` iff its commit
/// timestamp is `<= w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The smallest timestamp.
    pub const MIN: Timestamp = Timestamp(0);

    /// The largest timestamp.
    pub const MAX: Timestamp = Timestamp(u64::MAX);
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ------------------------------------------------------------------------------------------------
// Object / block / row identity
// ------------------------------------------------------------------------------------------------

/// Name of one physical object file: segment id plus file number within
/// the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectName {
    /// Owning segment id.
    pub segment: u64,

    /// File number within the segment.
    pub num: u16,
}

impl ObjectName {
    pub fn new(segment: u64, num: u16) -> Self {
        Self { segment, num }
    }

    /// Derives the name a promoted block is written under: same segment,
    /// file number shifted into the reserved range. `None` when the
    /// shifted number would not fit the u16 namespace.
    pub fn promoted(&self) -> Option<ObjectName> {
        Some(ObjectName {
            segment: self.segment,
            num: self.num.checked_add(ABLOCK_NUM_OFFSET)?,
        })
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}_{:05}", self.segment, self.num)
    }
}

/// Identity of one block: the object file that holds it plus its index
/// within that object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    pub name: ObjectName,
    pub index: u16,
}

impl BlockId {
    pub fn new(name: ObjectName, index: u16) -> Self {
        Self { name, index }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.index)
    }
}

/// Identity of one row: owning block plus row offset. Tombstone blocks
/// store the `RowId` of each deleted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId {
    pub block: BlockId,
    pub offset: u32,
}

impl RowId {
    pub fn new(block: BlockId, offset: u32) -> Self {
        Self { block, offset }
    }

    /// The head row of a block — used as the representative row id when a
    /// metadata row is rewritten to point at a freshly promoted block.
    pub fn head(block: BlockId) -> Self {
        Self { block, offset: 0 }
    }
}

// ------------------------------------------------------------------------------------------------
// Locations
// ------------------------------------------------------------------------------------------------

/// Byte extent of an object file region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub offset: u32,
    pub len: u32,
}

impl Extent {
    pub fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }
}

/// Physical location of one block: object name, block index within the
/// object, byte extent, and row count.
///
/// Locations are immutable values; equality is by content. "No location"
/// is modelled as `Option<BlockLocation>::None` in metadata columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub name: ObjectName,
    pub block: u16,
    pub extent: Extent,
    pub rows: u32,
}

impl BlockLocation {
    pub fn new(name: ObjectName, block: u16, extent: Extent, rows: u32) -> Self {
        Self {
            name,
            block,
            extent,
            rows,
        }
    }

    /// The id of the block this location points at.
    pub fn block_id(&self) -> BlockId {
        BlockId::new(self.name, self.block)
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}+{}({} rows)",
            self.name, self.block, self.extent.offset, self.extent.len, self.rows
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Block kind / metadata descriptor
// ------------------------------------------------------------------------------------------------

/// What a block physically contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Row payload.
    Data,

    /// Delete markers for another block's rows, keyed by [`RowId`].
    Tombstone,
}

/// Block header descriptor, loadable without row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Declared sort-key column index; `None` when the block is unsorted
    /// or unsortable.
    pub sort_key: Option<u16>,

    /// Whether the block is still open for inserts ("ablock").
    pub appendable: bool,
}

// ------------------------------------------------------------------------------------------------
// Soft-delete set
// ------------------------------------------------------------------------------------------------

/// Blocks already reconciled by a previous rewrite pass over a later
/// checkpoint in the chain.
///
/// Keyed by object name; each entry holds the block indices of that
/// object that must be skipped entirely by the indexer.
#[derive(Debug, Clone, Default)]
pub struct SoftDeleteSet {
    blocks: BTreeMap<ObjectName, BTreeSet<u16>>,
}

impl SoftDeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one block as superseded.
    pub fn insert(&mut self, name: ObjectName, block: u16) {
        self.blocks.entry(name).or_default().insert(block);
    }

    /// True if the block was superseded by an earlier pass.
    pub fn contains(&self, name: &ObjectName, block: u16) -> bool {
        self.blocks
            .get(name)
            .is_some_and(|set| set.contains(&block))
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of marked blocks.
    pub fn len(&self) -> usize {
        self.blocks.values().map(BTreeSet::len).sum()
    }
}
