//! Integration tests for the public rewrite API.
//!
//! These tests exercise the full pipeline (load → index → trim → rewrite
//! → reconcile → persist) through the public `tidemark` surface only: a
//! checkpoint is assembled over a [`MemoryStore`], rewritten to a
//! watermark, and the replacement checkpoint is reloaded and verified.
//!
//! ## Coverage areas
//! - **Unchanged exit**: a watermark past every commit returns the
//!   original locations and writes nothing
//! - **Promotion**: an appendable block with late rows and deletes comes
//!   back as a sorted sealed block under a derived object name
//! - **Idempotence**: rewriting the replacement checkpoint at the same
//!   watermark is a no-op
//! - **Checkpoint chains**: entry listing feeds the soft-delete set so
//!   earlier checkpoints skip superseded blocks
//! - **Version handling**: a wrong format version is rejected up front

use tidemark::batch::{Batch, Column, ColumnData};
use tidemark::checkpoint::{
    ATTR_APPENDABLE, ATTR_BLOCK_ID, ATTR_COMMIT_TS, ATTR_DATA_LOC, ATTR_DELTA_LOC, ATTR_ROW_ID,
    ATTR_SEGMENT, ATTR_SORTED, ATTR_TABLE_ID, CHECKPOINT_VERSION, MetaStore, bool_column,
    id_column, loc_column,
};
use tidemark::store::{BlockStore, CheckpointIo, MemoryStore, WriteBlock};
use tidemark::types::{
    BlockId, BlockKind, BlockLocation, ObjectName, RowId, SoftDeleteSet, Timestamp,
};
use tidemark::{RewriteConfig, RewriteError, load_checkpoint_entries, rewrite_checkpoint};
use tracing_subscriber::EnvFilter;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Pipes tracing output through the test harness.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Data-block payload: one value column plus the `[row_id, commit_ts,
/// aborted]` bookkeeping tail.
fn data_batch(id: BlockId, rows: &[(u64, u64)]) -> Batch {
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
    .expect("equal column lengths")
}

/// Writes one data block and returns its location.
fn write_data(
    store: &MemoryStore,
    id: BlockId,
    appendable: bool,
    sort_key: Option<u16>,
    rows: &[(u64, u64)],
) -> BlockLocation {
    let written = store
        .write_blocks(
            &id.name,
            &[WriteBlock {
                index: id.index,
                kind: BlockKind::Data,
                sort_key,
                appendable,
                batch: data_batch(id, rows),
            }],
        )
        .expect("write data block");
    BlockLocation::new(id.name, id.index, written.extent, written.handles[0].rows)
}

/// Writes one tombstone block and returns its location.
fn write_tombstone(store: &MemoryStore, id: BlockId, rows: &[(RowId, u64)]) -> BlockLocation {
    let mut row_ids = Vec::new();
    let mut commits = Vec::new();
    let mut aborted = Vec::new();
    for &(target, ts) in rows {
        row_ids.push(target);
        commits.push(Timestamp(ts));
        aborted.push(false);
    }
    let batch = Batch::from_columns(vec![
        Column::new("row_id", ColumnData::Row(row_ids)),
        Column::new("commit_ts", ColumnData::Ts(commits)),
        Column::new("aborted", ColumnData::Bool(aborted)),
    ])
    .expect("equal column lengths");
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
        .expect("write tombstone block");
    BlockLocation::new(id.name, id.index, written.extent, written.handles[0].rows)
}

/// One metadata row.
#[derive(Clone, Copy)]
struct Row {
    id: BlockId,
    appendable: bool,
    data_loc: Option<BlockLocation>,
    delta_loc: Option<BlockLocation>,
    table_id: u64,
    commit_ts: u64,
}

/// Assembles a checkpoint metadata store from live and dropped rows.
fn build_meta(live: &[Row], dropped: &[Row]) -> MetaStore {
    fn meta_batch(specs: &[Row]) -> Batch {
        Batch::from_columns(vec![
            Column::new(
                ATTR_ROW_ID,
                ColumnData::Row(specs.iter().map(|s| RowId::head(s.id)).collect()),
            ),
            Column::new(
                ATTR_BLOCK_ID,
                ColumnData::Id(specs.iter().map(|s| s.id).collect()),
            ),
            Column::new(
                ATTR_APPENDABLE,
                ColumnData::Bool(specs.iter().map(|s| s.appendable).collect()),
            ),
            Column::new(
                ATTR_SORTED,
                ColumnData::Bool(specs.iter().map(|s| !s.appendable).collect()),
            ),
            Column::new(
                ATTR_SEGMENT,
                ColumnData::U64(specs.iter().map(|s| s.id.name.segment).collect()),
            ),
            Column::new(
                ATTR_DATA_LOC,
                ColumnData::Loc(specs.iter().map(|s| s.data_loc).collect()),
            ),
            Column::new(
                ATTR_DELTA_LOC,
                ColumnData::Loc(specs.iter().map(|s| s.delta_loc).collect()),
            ),
            Column::new(
                ATTR_COMMIT_TS,
                ColumnData::Ts(specs.iter().map(|s| Timestamp(s.commit_ts)).collect()),
            ),
        ])
        .expect("equal column lengths")
    }
    fn txn_batch(specs: &[Row]) -> Batch {
        Batch::from_columns(vec![
            Column::new(
                ATTR_TABLE_ID,
                ColumnData::U64(specs.iter().map(|s| s.table_id).collect()),
            ),
            Column::new(
                ATTR_DATA_LOC,
                ColumnData::Loc(specs.iter().map(|s| s.data_loc).collect()),
            ),
            Column::new(
                ATTR_DELTA_LOC,
                ColumnData::Loc(specs.iter().map(|s| s.delta_loc).collect()),
            ),
        ])
        .expect("equal column lengths")
    }
    fn log_batch(specs: &[Row]) -> Batch {
        Batch::from_columns(vec![
            Column::new(
                ATTR_ROW_ID,
                ColumnData::Row(specs.iter().map(|s| RowId::head(s.id)).collect()),
            ),
            Column::new(
                ATTR_COMMIT_TS,
                ColumnData::Ts(specs.iter().map(|s| Timestamp(s.commit_ts)).collect()),
            ),
        ])
        .expect("equal column lengths")
    }

    let mut store = MetaStore::empty(CHECKPOINT_VERSION);
    store.live = meta_batch(live);
    store.live_txn = txn_batch(live);
    store.dropped = meta_batch(dropped);
    store.dropped_txn = txn_batch(dropped);
    store.dropped_log = log_batch(dropped);
    store.recompute_ranges().expect("ranges");
    store.validate().expect("valid checkpoint");
    store
}

fn persist(store: &MemoryStore, meta: &MetaStore) -> (BlockLocation, BlockLocation) {
    let cfg = RewriteConfig::default();
    let persisted = store
        .persist_checkpoint(meta, cfg.checkpoint_block_rows, cfg.checkpoint_size_limit)
        .expect("persist checkpoint");
    (persisted.meta_loc, persisted.aux_loc)
}

fn values_of(batch: &Batch) -> Vec<u64> {
    batch
        .column(0)
        .expect("value column")
        .data
        .as_u64s()
        .expect("u64 values")
        .to_vec()
}

// ================================================================================================
// Unchanged exit
// ================================================================================================

#[test]
fn watermark_past_every_commit_is_a_noop() {
    init_tracing();
    let store = MemoryStore::new();
    let id = BlockId::new(ObjectName::new(1, 0), 0);
    let data_loc = write_data(&store, id, true, Some(0), &[(10, 1), (20, 2)]);

    // The drop itself commits after the watermark; only the row commits
    // at 1 and 2 sit below it, so nothing needs trimming.
    let meta = build_meta(
        &[],
        &[Row {
            id,
            appendable: true,
            data_loc: Some(data_loc),
            delta_loc: None,
            table_id: 7,
            commit_ts: 200,
        }],
    );
    let (meta_loc, aux_loc) = persist(&store, &meta);
    let before = store.object_count().expect("count");

    let output = rewrite_checkpoint(
        &store,
        &store,
        &meta_loc,
        &aux_loc,
        CHECKPOINT_VERSION,
        Timestamp(100),
        &SoftDeleteSet::new(),
        &RewriteConfig::default(),
    )
    .expect("rewrite");

    assert_eq!(output.meta_loc, meta_loc);
    assert_eq!(output.aux_loc, aux_loc);
    assert!(output.files.is_empty());
    assert_eq!(store.object_count().expect("count"), before);
}

// ================================================================================================
// Promotion end to end, then idempotence
// ================================================================================================

#[test]
fn full_rewrite_then_rerun_is_stable() {
    init_tracing();
    let store = MemoryStore::new();

    // Table 7: one sealed block, untouched by the watermark.
    let sealed_id = BlockId::new(ObjectName::new(1, 0), 0);
    let sealed_loc = write_data(&store, sealed_id, false, None, &[(1, 1), (2, 2), (3, 3)]);

    // Table 7: one appendable block with rows past the watermark and a
    // tombstone deleting its offset-1 row.
    let open_id = BlockId::new(ObjectName::new(2, 0), 0);
    let open_loc = write_data(
        &store,
        open_id,
        true,
        Some(0),
        &[(50, 1), (40, 2), (30, 4), (20, 7), (10, 8)],
    );
    let tomb_id = BlockId::new(ObjectName::new(3, 0), 0);
    let tomb_loc = write_tombstone(&store, tomb_id, &[(RowId::new(open_id, 1), 3)]);

    let meta = build_meta(
        &[Row {
            id: sealed_id,
            appendable: false,
            data_loc: Some(sealed_loc),
            delta_loc: None,
            table_id: 7,
            commit_ts: 3,
        }],
        &[Row {
            id: open_id,
            appendable: true,
            data_loc: Some(open_loc),
            delta_loc: Some(tomb_loc),
            table_id: 7,
            commit_ts: 10,
        }],
    );
    let (meta_loc, aux_loc) = persist(&store, &meta);

    let output = rewrite_checkpoint(
        &store,
        &store,
        &meta_loc,
        &aux_loc,
        CHECKPOINT_VERSION,
        Timestamp(5),
        &SoftDeleteSet::new(),
        &RewriteConfig::default(),
    )
    .expect("rewrite");
    assert_ne!(output.meta_loc, meta_loc);
    assert!(!output.files.is_empty());

    // The replacement checkpoint: sealed block untouched, promoted block
    // appended to the live table, delete side empty.
    let new_meta = store
        .load_checkpoint(&output.meta_loc, CHECKPOINT_VERSION)
        .expect("load replacement");
    assert_eq!(new_meta.live.len(), 2);
    assert_eq!(new_meta.dropped.len(), 0);

    let locs = loc_column(&new_meta.live, ATTR_DATA_LOC).expect("data_loc");
    assert_eq!(locs[0], Some(sealed_loc));
    let promoted_loc = locs[1].expect("promoted location");
    let promoted_name = open_id.name.promoted().expect("promoted name");
    assert_eq!(promoted_loc.name, promoted_name);
    assert!(!bool_column(&new_meta.live, ATTR_APPENDABLE).expect("appendable")[1]);
    assert_eq!(
        id_column(&new_meta.live, ATTR_BLOCK_ID).expect("block_id")[1].name,
        promoted_name
    );

    // Promoted payload: rows at commits 1, 2, 4 minus the deleted row,
    // sorted by the value column, bookkeeping stripped.
    let sealed = store
        .read_block(&promoted_loc, BlockKind::Data)
        .expect("read promoted");
    assert_eq!(values_of(&sealed), vec![30, 50]);
    assert_eq!(sealed.num_columns(), 1);

    // Rewriting the replacement at the same watermark changes nothing.
    let rerun = rewrite_checkpoint(
        &store,
        &store,
        &output.meta_loc,
        &output.aux_loc,
        CHECKPOINT_VERSION,
        Timestamp(5),
        &SoftDeleteSet::new(),
        &RewriteConfig::default(),
    )
    .expect("rerun");
    assert_eq!(rerun.meta_loc, output.meta_loc);
    assert!(rerun.files.is_empty());
}

// ================================================================================================
// Checkpoint chains and soft deletes
// ================================================================================================

#[test]
fn chain_rewrite_skips_blocks_superseded_by_later_checkpoints() {
    init_tracing();
    let store = MemoryStore::new();
    let id = BlockId::new(ObjectName::new(1, 0), 0);
    let data_loc = write_data(&store, id, true, Some(0), &[(10, 1), (20, 9)]);

    let drop_row = Row {
        id,
        appendable: true,
        data_loc: Some(data_loc),
        delta_loc: None,
        table_id: 7,
        commit_ts: 20,
    };

    // The later checkpoint in the chain already drops the block; walking
    // it first populates the soft-delete set.
    let later = build_meta(&[], &[drop_row]);
    let (later_loc, _) = persist(&store, &later);

    let mut soft = SoftDeleteSet::new();
    let (locations, _) =
        load_checkpoint_entries(&store, &later_loc, CHECKPOINT_VERSION, Some(&mut soft))
            .expect("entry listing");
    assert!(locations.contains(&data_loc));

    // The earlier checkpoint references the same block; with the soft
    // set applied its rewrite is a no-op even below the watermark.
    let earlier = build_meta(&[], &[drop_row]);
    let (earlier_loc, earlier_aux) = persist(&store, &earlier);
    let output = rewrite_checkpoint(
        &store,
        &store,
        &earlier_loc,
        &earlier_aux,
        CHECKPOINT_VERSION,
        Timestamp(5),
        &soft,
        &RewriteConfig::default(),
    )
    .expect("chain rewrite");
    assert_eq!(output.meta_loc, earlier_loc);
    assert!(output.files.is_empty());
}

// ================================================================================================
// Version handling
// ================================================================================================

#[test]
fn wrong_format_version_is_rejected() {
    init_tracing();
    let store = MemoryStore::new();
    let meta = build_meta(&[], &[]);
    let (meta_loc, aux_loc) = persist(&store, &meta);

    let err = rewrite_checkpoint(
        &store,
        &store,
        &meta_loc,
        &aux_loc,
        CHECKPOINT_VERSION + 1,
        Timestamp(5),
        &SoftDeleteSet::new(),
        &RewriteConfig::default(),
    )
    .expect_err("version mismatch");
    assert!(matches!(err, RewriteError::Store(_)));
}
