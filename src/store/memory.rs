//! In-memory [`BlockStore`] / [`CheckpointIo`] backend.
//!
//! Objects live in a mutex-guarded map of `ObjectName` to block map; each
//! stored block keeps its header descriptor, its encoded payload, and a
//! CRC32 of the payload that is verified on every read. Checkpoints are
//! stored as raw-payload blocks under a reserved segment id so they can
//! never collide with data objects.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{
    BlockHandle, BlockStore, CheckpointIo, PersistedCheckpoint, StoreError, WriteBlock,
    WrittenObject,
};
use crate::batch::Batch;
use crate::checkpoint::{CHECKPOINT_VERSION, MetaStore};
use crate::encoding::{self, decode_from_slice, encode_to_vec};
use crate::types::{BlockKind, BlockLocation, BlockMeta, Extent, ObjectName};
use tracing::{debug, trace};

/// Reserved segment id for checkpoint objects.
const CHECKPOINT_SEGMENT: u64 = u64::MAX;

/// Block index of the metadata payload within a checkpoint object.
const CHECKPOINT_META_BLOCK: u16 = 0;

/// Block index of the auxiliary location list within a checkpoint object.
const CHECKPOINT_AUX_BLOCK: u16 = 1;

// ------------------------------------------------------------------------------------------------
// Stored representation
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct StoredBlock {
    kind: BlockKind,
    sort_key: Option<u16>,
    appendable: bool,
    rows: u32,
    payload: Vec<u8>,
    checksum: u32,
}

impl StoredBlock {
    fn verify(&self, location: &BlockLocation) -> Result<(), StoreError> {
        if crc32fast::hash(&self.payload) != self.checksum {
            return Err(StoreError::ChecksumMismatch(location.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectName, BTreeMap<u16, StoredBlock>>,
    next_checkpoint: u16,
}

// ------------------------------------------------------------------------------------------------
// MemoryStore
// ------------------------------------------------------------------------------------------------

/// Thread-safe in-memory object store used by tests, benches, and tooling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Internal("store mutex poisoned".into()))
    }

    /// Number of objects currently stored, checkpoints included.
    pub fn object_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.objects.len())
    }

    /// True if an object with this name exists.
    pub fn contains_object(&self, name: &ObjectName) -> Result<bool, StoreError> {
        Ok(self.lock()?.objects.contains_key(name))
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Flips one payload byte of a stored block.
    pub(crate) fn corrupt_block(&self, name: &ObjectName, block: u16) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner
            .objects
            .get_mut(name)
            .and_then(|o| o.get_mut(&block))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if let Some(byte) = stored.payload.first_mut() {
            *byte ^= 0xff;
        }
        Ok(())
    }
}

impl BlockStore for MemoryStore {
    fn read_block(&self, loc: &BlockLocation, kind: BlockKind) -> Result<Batch, StoreError> {
        let inner = self.lock()?;
        let block = lookup(&inner, loc)?;
        if block.kind != kind {
            return Err(StoreError::KindMismatch {
                location: loc.to_string(),
                stored: block.kind,
                requested: kind,
            });
        }
        block.verify(loc)?;
        trace!(location = %loc, rows = block.rows, "read block");
        let (batch, _) = decode_from_slice::<Batch>(&block.payload)?;
        Ok(batch)
    }

    fn read_block_meta(&self, loc: &BlockLocation) -> Result<BlockMeta, StoreError> {
        let inner = self.lock()?;
        let block = lookup(&inner, loc)?;
        Ok(BlockMeta {
            sort_key: block.sort_key,
            appendable: block.appendable,
        })
    }

    fn write_blocks(
        &self,
        dst: &ObjectName,
        blocks: &[WriteBlock],
    ) -> Result<WrittenObject, StoreError> {
        let mut inner = self.lock()?;
        if inner.objects.contains_key(dst) {
            return Err(StoreError::AlreadyExists(dst.to_string()));
        }

        let mut stored = BTreeMap::new();
        let mut handles = Vec::with_capacity(blocks.len());
        let mut total = 0u32;
        for block in blocks {
            let rows = block.batch.len() as u32;
            let payload = encode_to_vec(&block.batch)?;
            total = total.saturating_add(payload.len() as u32);
            let checksum = crc32fast::hash(&payload);
            stored.insert(
                block.index,
                StoredBlock {
                    kind: block.kind,
                    sort_key: block.sort_key,
                    appendable: block.appendable,
                    rows,
                    payload,
                    checksum,
                },
            );
            handles.push(BlockHandle {
                index: block.index,
                rows,
            });
        }

        debug!(object = %dst, blocks = handles.len(), bytes = total, "wrote object");
        inner.objects.insert(*dst, stored);
        Ok(WrittenObject {
            handles,
            extent: Extent::new(0, total),
        })
    }

    fn delete_object(&self, name: &ObjectName) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.objects.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        debug!(object = %name, "deleted object");
        Ok(())
    }

    fn sort_rows(&self, batch: &mut Batch, key: usize) -> Result<(), StoreError> {
        batch.sort_by_column(key)?;
        Ok(())
    }
}

impl CheckpointIo for MemoryStore {
    fn load_checkpoint(&self, loc: &BlockLocation, version: u32) -> Result<MetaStore, StoreError> {
        if version != CHECKPOINT_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let inner = self.lock()?;
        let block = lookup(&inner, loc)?;
        block.verify(loc)?;
        let (store, _) = decode_from_slice::<MetaStore>(&block.payload)?;
        if store.version != version {
            return Err(StoreError::UnsupportedVersion(store.version));
        }
        trace!(location = %loc, live = store.live.len(), dropped = store.dropped.len(), "loaded checkpoint");
        Ok(store)
    }

    fn persist_checkpoint(
        &self,
        store: &MetaStore,
        block_row_limit: usize,
        size_limit: usize,
    ) -> Result<PersistedCheckpoint, StoreError> {
        if block_row_limit == 0 || size_limit == 0 {
            return Err(StoreError::Internal(
                "checkpoint chunking limits must be nonzero".into(),
            ));
        }

        let meta_payload = encode_to_vec(store)?;
        if meta_payload.len() > size_limit {
            debug!(
                bytes = meta_payload.len(),
                limit = size_limit,
                "checkpoint exceeds its size hint"
            );
        }
        let mut aux_payload = Vec::new();
        encoding::encode_vec(&store.locations, &mut aux_payload)?;

        let mut inner = self.lock()?;
        let name = ObjectName::new(CHECKPOINT_SEGMENT, inner.next_checkpoint);
        inner.next_checkpoint = inner
            .next_checkpoint
            .checked_add(1)
            .ok_or_else(|| StoreError::Internal("checkpoint namespace exhausted".into()))?;

        let meta_loc = BlockLocation::new(
            name,
            CHECKPOINT_META_BLOCK,
            Extent::new(0, meta_payload.len() as u32),
            (store.live.len() + store.dropped.len()) as u32,
        );
        let aux_loc = BlockLocation::new(
            name,
            CHECKPOINT_AUX_BLOCK,
            Extent::new(meta_loc.extent.len, aux_payload.len() as u32),
            store.locations.len() as u32,
        );

        let mut blocks = BTreeMap::new();
        blocks.insert(CHECKPOINT_META_BLOCK, raw_block(meta_loc.rows, meta_payload));
        blocks.insert(CHECKPOINT_AUX_BLOCK, raw_block(aux_loc.rows, aux_payload));
        inner.objects.insert(name, blocks);

        debug!(object = %name, meta = %meta_loc, "persisted checkpoint");
        Ok(PersistedCheckpoint {
            meta_loc,
            aux_loc,
            files: vec![name.to_string()],
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn lookup<'a>(inner: &'a Inner, loc: &BlockLocation) -> Result<&'a StoredBlock, StoreError> {
    let object = inner
        .objects
        .get(&loc.name)
        .ok_or_else(|| StoreError::NotFound(loc.name.to_string()))?;
    object
        .get(&loc.block)
        .ok_or_else(|| StoreError::BlockNotFound(loc.to_string()))
}

fn raw_block(rows: u32, payload: Vec<u8>) -> StoredBlock {
    let checksum = crc32fast::hash(&payload);
    StoredBlock {
        kind: BlockKind::Data,
        sort_key: None,
        appendable: false,
        rows,
        payload,
        checksum,
    }
}

/// Reads the auxiliary location list of a persisted checkpoint. The
/// rewrite engine itself only consumes the metadata payload, so this is
/// test-only.
#[cfg(test)]
pub(crate) fn read_aux_locations(
    store: &MemoryStore,
    aux_loc: &BlockLocation,
) -> Result<Vec<BlockLocation>, StoreError> {
    let inner = store.lock()?;
    let block = lookup(&inner, aux_loc)?;
    block.verify(aux_loc)?;
    let (locations, _) = encoding::decode_vec::<BlockLocation>(&block.payload)?;
    Ok(locations)
}
