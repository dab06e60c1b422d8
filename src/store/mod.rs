//! # Storage Collaborator Seams
//!
//! The rewrite engine never touches bytes on its own: all block and
//! checkpoint I/O goes through the [`BlockStore`] and [`CheckpointIo`]
//! traits defined here. The production storage backend (object codec,
//! remote blob store) lives outside this crate; [`MemoryStore`] is the
//! in-crate implementation used by tests, benches, and tooling.
//!
//! ## Error contract
//!
//! - [`StoreError::AlreadyExists`] is the only *recoverable* write
//!   failure: the rewrite engine handles it by deleting the stale
//!   destination and retrying exactly once.
//! - Everything else is fatal to the invocation; no partial checkpoint
//!   is ever persisted.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

mod memory;

pub use memory::MemoryStore;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;

use crate::batch::{Batch, BatchError};
use crate::checkpoint::MetaStore;
use crate::encoding::EncodingError;
use crate::types::{BlockKind, BlockLocation, BlockMeta, Extent, ObjectName};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The addressed block does not exist within its object.
    #[error("block not found: {0}")]
    BlockNotFound(String),

    /// The destination object name is already taken.
    ///
    /// The single recoverable write failure; see the module docs.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// A block was addressed with the wrong kind tag.
    #[error("block kind mismatch at {location}: stored {stored:?}, requested {requested:?}")]
    KindMismatch {
        location: String,
        stored: BlockKind,
        requested: BlockKind,
    },

    /// Stored payload failed its checksum.
    #[error("checksum mismatch at {0}")]
    ChecksumMismatch(String),

    /// The checkpoint format version tag is not understood.
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Batch-level error while materialising rows.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Underlying I/O error (disk- or network-backed implementations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Implementation-specific failure.
    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    /// True for the destination-collision condition the rewrite engine
    /// recovers from by delete-and-retry.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

// ------------------------------------------------------------------------------------------------
// Write descriptors
// ------------------------------------------------------------------------------------------------

/// One block handed to [`BlockStore::write_blocks`].
///
/// The caller assigns the block index; indices survive the write so that
/// extents keep mapping back to the metadata rows that reference them.
#[derive(Debug)]
pub struct WriteBlock {
    /// Block index within the destination object.
    pub index: u16,

    /// Payload vs. tombstone.
    pub kind: BlockKind,

    /// Declared sort-key column, carried into the block header.
    pub sort_key: Option<u16>,

    /// Whether the block remains open for inserts after the write.
    pub appendable: bool,

    /// Row data.
    pub batch: Batch,
}

/// Per-block result of a completed object write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub index: u16,
    pub rows: u32,
}

/// Result of writing one object: the handles of its blocks (in the order
/// supplied) and the object's byte extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenObject {
    pub handles: Vec<BlockHandle>,
    pub extent: Extent,
}

/// Result of persisting a reconciled checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCheckpoint {
    /// Location of the new checkpoint's metadata payload.
    pub meta_loc: BlockLocation,

    /// Location of the new checkpoint's auxiliary location list.
    pub aux_loc: BlockLocation,

    /// Names of every file written for the checkpoint.
    pub files: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// Collaborator traits
// ------------------------------------------------------------------------------------------------

/// Block-granular storage collaborator: load row data and headers, write
/// whole objects, delete stale destinations, and sort row batches.
pub trait BlockStore {
    /// Loads one block's row data by location and kind.
    fn read_block(&self, loc: &BlockLocation, kind: BlockKind) -> Result<Batch, StoreError>;

    /// Loads a block's sort-key / appendability descriptor without row
    /// data.
    fn read_block_meta(&self, loc: &BlockLocation) -> Result<BlockMeta, StoreError>;

    /// Writes the supplied blocks as the object `dst`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if `dst` is taken. Blocks
    /// are borrowed so a collision retry can resubmit them unchanged.
    fn write_blocks(
        &self,
        dst: &ObjectName,
        blocks: &[WriteBlock],
    ) -> Result<WrittenObject, StoreError>;

    /// Removes an object by name.
    fn delete_object(&self, name: &ObjectName) -> Result<(), StoreError>;

    /// Stable in-place sort of a row batch by one key column.
    fn sort_rows(&self, batch: &mut Batch, key: usize) -> Result<(), StoreError>;
}

/// Checkpoint-granular storage collaborator.
pub trait CheckpointIo {
    /// Reads a checkpoint's metadata tables given its location and format
    /// version tag.
    fn load_checkpoint(&self, loc: &BlockLocation, version: u32) -> Result<MetaStore, StoreError>;

    /// Persists a reconciled metadata store as a new checkpoint.
    ///
    /// `block_row_limit` and `size_limit` bound the checkpoint's physical
    /// chunking; implementations may treat them as hints but must reject
    /// zero values.
    fn persist_checkpoint(
        &self,
        store: &MetaStore,
        block_row_limit: usize,
        size_limit: usize,
    ) -> Result<PersistedCheckpoint, StoreError>;
}
