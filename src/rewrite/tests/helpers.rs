//! Shared fixtures: physical blocks with bookkeeping columns and a
//! metadata-store builder.

use crate::batch::{Batch, Column, ColumnData};
use crate::checkpoint::{
    ATTR_APPENDABLE, ATTR_BLOCK_ID, ATTR_COMMIT_TS, ATTR_DATA_LOC, ATTR_DELTA_LOC, ATTR_ROW_ID,
    ATTR_SEGMENT, ATTR_SORTED, ATTR_TABLE_ID, CHECKPOINT_VERSION, MetaStore,
};
use crate::store::{BlockStore, MemoryStore, WriteBlock};
use crate::types::{BlockId, BlockKind, BlockLocation, RowId, Timestamp};
use tracing_subscriber::EnvFilter;

/// Pipes tracing output through the test harness; call first in tests
/// that exercise the full pipeline.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Data-block payload: one value column plus the `[row_id, commit_ts,
/// aborted]` bookkeeping tail. Rows are `(value, commit_ts)` pairs in
/// physical order.
pub fn data_batch(id: BlockId, rows: &[(u64, u64)]) -> Batch {
    let mut values = Vec::new();
    let mut row_ids = Vec::new();
    let mut commits = Vec::new();
    let mut aborted = Vec::new();
    for (offset, &(value, ts)) in rows.iter().enumerate() {
        values.push(value);
        row_ids.push(RowId::new(id, offset as u32));
        commits.push(Timestamp(ts));
        aborted.push(false);
    }
    Batch::from_columns(vec![
        Column::new("val", ColumnData::U64(values)),
        Column::new("row_id", ColumnData::Row(row_ids)),
        Column::new("commit_ts", ColumnData::Ts(commits)),
        Column::new("aborted", ColumnData::Bool(aborted)),
    ])
    .unwrap()
}

/// Tombstone payload: `[target row_id, commit_ts, aborted]`. Rows are
/// `(target, delete commit_ts)` pairs.
pub fn tombstone_batch(rows: &[(RowId, u64)]) -> Batch {
    let mut row_ids = Vec::new();
    let mut commits = Vec::new();
    let mut aborted = Vec::new();
    for &(target, ts) in rows {
        row_ids.push(target);
        commits.push(Timestamp(ts));
        aborted.push(false);
    }
    Batch::from_columns(vec![
        Column::new("row_id", ColumnData::Row(row_ids)),
        Column::new("commit_ts", ColumnData::Ts(commits)),
        Column::new("aborted", ColumnData::Bool(aborted)),
    ])
    .unwrap()
}

/// Writes one data block and returns its location.
pub fn write_data(
    store: &MemoryStore,
    id: BlockId,
    appendable: bool,
    sort_key: Option<u16>,
    rows: &[(u64, u64)],
) -> BlockLocation {
    let batch = data_batch(id, rows);
    let written = store
        .write_blocks(
            &id.name,
            &[WriteBlock {
                index: id.index,
                kind: BlockKind::Data,
                sort_key,
                appendable,
                batch,
            }],
        )
        .unwrap();
    BlockLocation::new(id.name, id.index, written.extent, written.handles[0].rows)
}

/// Writes one tombstone block and returns its location.
pub fn write_tombstone(
    store: &MemoryStore,
    id: BlockId,
    rows: &[(RowId, u64)],
) -> BlockLocation {
    let batch = tombstone_batch(rows);
    let written = store
        .write_blocks(
            &id.name,
            &[WriteBlock {
                index: id.index,
                kind: BlockKind::Tombstone,
                sort_key: None,
                appendable: false,
                batch,
            }],
        )
        .unwrap();
    BlockLocation::new(id.name, id.index, written.extent, written.handles[0].rows)
}

/// One metadata row for the builder.
#[derive(Debug, Clone, Copy)]
pub struct RowSpec {
    pub id: BlockId,
    pub appendable: bool,
    pub data_loc: Option<BlockLocation>,
    pub delta_loc: Option<BlockLocation>,
    pub table_id: u64,
    pub commit_ts: u64,
}

/// Assembles a [`MetaStore`] from live and dropped row specs.
#[derive(Debug, Default)]
pub struct MetaBuilder {
    live: Vec<RowSpec>,
    dropped: Vec<RowSpec>,
}

impl MetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(mut self, spec: RowSpec) -> Self {
        self.live.push(spec);
        self
    }

    pub fn dropped(mut self, spec: RowSpec) -> Self {
        self.dropped.push(spec);
        self
    }

    pub fn build(self) -> MetaStore {
        let mut store = MetaStore::empty(CHECKPOINT_VERSION);
        store.live = meta_batch(&self.live);
        store.live_txn = txn_batch(&self.live);
        store.dropped = meta_batch(&self.dropped);
        store.dropped_txn = txn_batch(&self.dropped);
        store.dropped_log = log_batch(&self.dropped);
        store.recompute_ranges().unwrap();
        store.validate().unwrap();
        store
    }
}

fn meta_batch(specs: &[RowSpec]) -> Batch {
    let mut row_ids = Vec::new();
    let mut block_ids = Vec::new();
    let mut appendable = Vec::new();
    let mut sorted = Vec::new();
    let mut segments = Vec::new();
    let mut data_locs = Vec::new();
    let mut delta_locs = Vec::new();
    let mut commits = Vec::new();
    for spec in specs {
        row_ids.push(RowId::head(spec.id));
        block_ids.push(spec.id);
        appendable.push(spec.appendable);
        sorted.push(!spec.appendable);
        segments.push(spec.id.name.segment);
        data_locs.push(spec.data_loc);
        delta_locs.push(spec.delta_loc);
        commits.push(Timestamp(spec.commit_ts));
    }
    Batch::from_columns(vec![
        Column::new(ATTR_ROW_ID, ColumnData::Row(row_ids)),
        Column::new(ATTR_BLOCK_ID, ColumnData::Id(block_ids)),
        Column::new(ATTR_APPENDABLE, ColumnData::Bool(appendable)),
        Column::new(ATTR_SORTED, ColumnData::Bool(sorted)),
        Column::new(ATTR_SEGMENT, ColumnData::U64(segments)),
        Column::new(ATTR_DATA_LOC, ColumnData::Loc(data_locs)),
        Column::new(ATTR_DELTA_LOC, ColumnData::Loc(delta_locs)),
        Column::new(ATTR_COMMIT_TS, ColumnData::Ts(commits)),
    ])
    .unwrap()
}

fn txn_batch(specs: &[RowSpec]) -> Batch {
    let mut table_ids = Vec::new();
    let mut data_locs = Vec::new();
    let mut delta_locs = Vec::new();
    for spec in specs {
        table_ids.push(spec.table_id);
        data_locs.push(spec.data_loc);
        delta_locs.push(spec.delta_loc);
    }
    Batch::from_columns(vec![
        Column::new(ATTR_TABLE_ID, ColumnData::U64(table_ids)),
        Column::new(ATTR_DATA_LOC, ColumnData::Loc(data_locs)),
        Column::new(ATTR_DELTA_LOC, ColumnData::Loc(delta_locs)),
    ])
    .unwrap()
}

fn log_batch(specs: &[RowSpec]) -> Batch {
    let mut row_ids = Vec::new();
    let mut commits = Vec::new();
    for spec in specs {
        row_ids.push(RowId::head(spec.id));
        commits.push(Timestamp(spec.commit_ts));
    }
    Batch::from_columns(vec![
        Column::new(ATTR_ROW_ID, ColumnData::Row(row_ids)),
        Column::new(ATTR_COMMIT_TS, ColumnData::Ts(commits)),
    ])
    .unwrap()
}

/// Values of the first column of a data batch, in row order.
pub fn values_of(batch: &Batch) -> Vec<u64> {
    batch.column(0).unwrap().data.as_u64s().unwrap().to_vec()
}
