//! # Columnar Row Batches
//!
//! A [`Batch`] is an ordered set of equally-long named columns — the unit
//! in which both block row data and checkpoint metadata tables travel
//! through the rewrite. Batches are plain owned data: loading a block
//! produces a batch, trimming shrinks it in place, and writing a block
//! consumes it.
//!
//! ## Supported column types
//!
//! [`ColumnData`] covers exactly the types the checkpoint metadata schema
//! and block bookkeeping columns need: unsigned integers, bools, logical
//! timestamps, block/row identities, optional block locations, and opaque
//! byte cells for user payloads.
//!
//! ## Row operations
//!
//! - [`Batch::shrink`] — keep a selected row subset (tombstone trim).
//! - [`Batch::remove_rows`] — inverse selection (delete application,
//!   delete-side compaction).
//! - [`Batch::truncate`] — drop every row from a boundary on (data-block
//!   watermark cut).
//! - [`Batch::sort_by_column`] — stable permutation sort by one key column.
//! - [`Batch::push_row_from`] — copy one row from a schema-compatible batch.
//! - [`Batch::normalize_columns`] — canonical `col_N` attribute naming,
//!   required before a batch is handed to a block writer.

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

use std::cmp::Ordering;

use crate::types::{BlockId, BlockLocation, RowId, Timestamp};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by batch operations.
#[derive(Debug, Error)]
pub enum BatchError {
    /// No column with the given name exists in the batch.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Column index out of range.
    #[error("column index {index} out of range ({columns} columns)")]
    ColumnOutOfRange {
        index: usize,
        columns: usize,
    },

    /// Row index out of range.
    #[error("row {row} out of range ({rows} rows)")]
    RowOutOfRange {
        row: usize,
        rows: usize,
    },

    /// A value's type does not match the column it targets.
    #[error("type mismatch on column '{0}'")]
    TypeMismatch(String),

    /// Columns of a single batch disagree on row count.
    #[error("ragged batch: column '{column}' has {len} rows, expected {expected}")]
    Ragged {
        column: String,
        len: usize,
        expected: usize,
    },

    /// The requested sort key column cannot be ordered.
    #[error("column '{0}' is not sortable")]
    Unsortable(String),
}

// ------------------------------------------------------------------------------------------------
// Cell values
// ------------------------------------------------------------------------------------------------

/// One cell of a batch, used when copying or updating rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U64(u64),
    Bool(bool),
    Ts(Timestamp),
    Id(BlockId),
    Row(RowId),
    Loc(Option<BlockLocation>),
    Bytes(Vec<u8>),
}

// ------------------------------------------------------------------------------------------------
// Column storage
// ------------------------------------------------------------------------------------------------

/// Typed column storage. Each variant is a dense vector of one cell type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    U64(Vec<u64>),
    Bool(Vec<bool>),
    Ts(Vec<Timestamp>),
    Id(Vec<BlockId>),
    Row(Vec<RowId>),
    Loc(Vec<Option<BlockLocation>>),
    Bytes(Vec<Vec<u8>>),
}

macro_rules! per_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ColumnData::U64($v) => $body,
            ColumnData::Bool($v) => $body,
            ColumnData::Ts($v) => $body,
            ColumnData::Id($v) => $body,
            ColumnData::Row($v) => $body,
            ColumnData::Loc($v) => $body,
            ColumnData::Bytes($v) => $body,
        }
    };
}

impl ColumnData {
    /// Number of rows stored.
    pub fn len(&self) -> usize {
        per_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads one cell. Byte cells are cloned.
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::U64(v) => v.get(row).copied().map(Value::U64),
            ColumnData::Bool(v) => v.get(row).copied().map(Value::Bool),
            ColumnData::Ts(v) => v.get(row).copied().map(Value::Ts),
            ColumnData::Id(v) => v.get(row).copied().map(Value::Id),
            ColumnData::Row(v) => v.get(row).copied().map(Value::Row),
            ColumnData::Loc(v) => v.get(row).copied().map(Value::Loc),
            ColumnData::Bytes(v) => v.get(row).cloned().map(Value::Bytes),
        }
    }

    /// Appends one cell; the value type must match the column type.
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (ColumnData::U64(v), Value::U64(x)) => v.push(x),
            (ColumnData::Bool(v), Value::Bool(x)) => v.push(x),
            (ColumnData::Ts(v), Value::Ts(x)) => v.push(x),
            (ColumnData::Id(v), Value::Id(x)) => v.push(x),
            (ColumnData::Row(v), Value::Row(x)) => v.push(x),
            (ColumnData::Loc(v), Value::Loc(x)) => v.push(x),
            (ColumnData::Bytes(v), Value::Bytes(x)) => v.push(x),
            (_, value) => return Err(value),
        }
        Ok(())
    }

    /// Overwrites one cell; the value type must match the column type and
    /// `row` must be in bounds.
    pub fn set(&mut self, row: usize, value: Value) -> Result<(), Value> {
        if row >= self.len() {
            return Err(value);
        }
        match (self, value) {
            (ColumnData::U64(v), Value::U64(x)) => v[row] = x,
            (ColumnData::Bool(v), Value::Bool(x)) => v[row] = x,
            (ColumnData::Ts(v), Value::Ts(x)) => v[row] = x,
            (ColumnData::Id(v), Value::Id(x)) => v[row] = x,
            (ColumnData::Row(v), Value::Row(x)) => v[row] = x,
            (ColumnData::Loc(v), Value::Loc(x)) => v[row] = x,
            (ColumnData::Bytes(v), Value::Bytes(x)) => v[row] = x,
            (_, value) => return Err(value),
        }
        Ok(())
    }

    /// Keeps only the rows listed in `keep` (ascending, in-bounds).
    fn shrink(&mut self, keep: &[usize]) {
        per_variant!(self, v => {
            let mut out = Vec::with_capacity(keep.len());
            for &row in keep {
                out.push(v[row].clone());
            }
            *v = out;
        });
    }

    /// Drops every row from `n` on.
    fn truncate(&mut self, n: usize) {
        per_variant!(self, v => v.truncate(n));
    }

    /// Reorders rows so that output row `i` is former row `perm[i]`.
    fn apply_permutation(&mut self, perm: &[usize]) {
        per_variant!(self, v => {
            let mut out = Vec::with_capacity(perm.len());
            for &row in perm {
                out.push(v[row].clone());
            }
            *v = out;
        });
    }

    /// True if the cell type has a total order usable as a sort key.
    fn is_sortable(&self) -> bool {
        !matches!(self, ColumnData::Loc(_))
    }

    /// Compares two rows of this column, if the type is orderable.
    fn try_cmp(&self, a: usize, b: usize) -> Option<Ordering> {
        match self {
            ColumnData::U64(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Bool(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Ts(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Bytes(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Id(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Row(v) => Some(v[a].cmp(&v[b])),
            ColumnData::Loc(_) => None,
        }
    }

    /// Typed view of a timestamp column.
    pub fn as_timestamps(&self) -> Option<&[Timestamp]> {
        match self {
            ColumnData::Ts(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of a row-id column.
    pub fn as_row_ids(&self) -> Option<&[RowId]> {
        match self {
            ColumnData::Row(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of a location column.
    pub fn as_locations(&self) -> Option<&[Option<BlockLocation>]> {
        match self {
            ColumnData::Loc(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of a u64 column.
    pub fn as_u64s(&self) -> Option<&[u64]> {
        match self {
            ColumnData::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of a bool column.
    pub fn as_bools(&self) -> Option<&[bool]> {
        match self {
            ColumnData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of a block-id column.
    pub fn as_block_ids(&self) -> Option<&[BlockId]> {
        match self {
            ColumnData::Id(v) => Some(v),
            _ => None,
        }
    }

    /// An empty column of the same type.
    fn empty_like(&self) -> ColumnData {
        match self {
            ColumnData::U64(_) => ColumnData::U64(Vec::new()),
            ColumnData::Bool(_) => ColumnData::Bool(Vec::new()),
            ColumnData::Ts(_) => ColumnData::Ts(Vec::new()),
            ColumnData::Id(_) => ColumnData::Id(Vec::new()),
            ColumnData::Row(_) => ColumnData::Row(Vec::new()),
            ColumnData::Loc(_) => ColumnData::Loc(Vec::new()),
            ColumnData::Bytes(_) => ColumnData::Bytes(Vec::new()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Column
// ------------------------------------------------------------------------------------------------

/// One named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Batch
// ------------------------------------------------------------------------------------------------

/// An ordered set of equally-long named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
}

impl Batch {
    /// Builds a batch, rejecting ragged column lengths.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, BatchError> {
        if let Some(first) = columns.first() {
            let expected = first.data.len();
            for col in &columns {
                if col.data.len() != expected {
                    return Err(BatchError::Ragged {
                        column: col.name.clone(),
                        len: col.data.len(),
                        expected,
                    });
                }
            }
        }
        Ok(Self { columns })
    }

    /// An empty batch with the same column names and types as `self`.
    pub fn empty_like(&self) -> Batch {
        Batch {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.empty_like()))
                .collect(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column by position.
    pub fn column(&self, index: usize) -> Result<&Column, BatchError> {
        self.columns.get(index).ok_or(BatchError::ColumnOutOfRange {
            index,
            columns: self.columns.len(),
        })
    }

    /// Column by name.
    pub fn column_by_name(&self, name: &str) -> Result<&Column, BatchError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| BatchError::ColumnNotFound(name.to_string()))
    }

    fn column_by_name_mut(&mut self, name: &str) -> Result<&mut Column, BatchError> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| BatchError::ColumnNotFound(name.to_string()))
    }

    /// Overwrites one cell, addressed by column name.
    pub fn update(&mut self, name: &str, row: usize, value: Value) -> Result<(), BatchError> {
        let rows = self.len();
        if row >= rows {
            return Err(BatchError::RowOutOfRange { row, rows });
        }
        let col = self.column_by_name_mut(name)?;
        col.data
            .set(row, value)
            .map_err(|_| BatchError::TypeMismatch(name.to_string()))
    }

    /// Appends row `row` of `src` to `self`. Schemas must agree in column
    /// count and cell types; column names are not compared, so a batch can
    /// receive rows from a normalized sibling.
    pub fn push_row_from(&mut self, src: &Batch, row: usize) -> Result<(), BatchError> {
        if src.num_columns() != self.num_columns() {
            return Err(BatchError::Ragged {
                column: "<schema>".into(),
                len: src.num_columns(),
                expected: self.num_columns(),
            });
        }
        if row >= src.len() {
            return Err(BatchError::RowOutOfRange {
                row,
                rows: src.len(),
            });
        }
        for (dst_col, src_col) in self.columns.iter_mut().zip(src.columns.iter()) {
            // get() is in-bounds here; push() only fails on type mismatch.
            let value = src_col.data.get(row).ok_or(BatchError::RowOutOfRange {
                row,
                rows: src_col.data.len(),
            })?;
            dst_col
                .data
                .push(value)
                .map_err(|_| BatchError::TypeMismatch(dst_col.name.clone()))?;
        }
        Ok(())
    }

    /// Keeps only the listed rows. `keep` must be ascending and in bounds.
    pub fn shrink(&mut self, keep: &[usize]) -> Result<(), BatchError> {
        let rows = self.len();
        if let Some(&max) = keep.last() {
            if max >= rows {
                return Err(BatchError::RowOutOfRange { row: max, rows });
            }
        }
        for col in &mut self.columns {
            col.data.shrink(keep);
        }
        Ok(())
    }

    /// Removes the listed rows (inverse selection). `rows` must be
    /// ascending and duplicate-free.
    pub fn remove_rows(&mut self, rows: &[usize]) -> Result<(), BatchError> {
        if rows.is_empty() {
            return Ok(());
        }
        let len = self.len();
        if let Some(&max) = rows.last() {
            if max >= len {
                return Err(BatchError::RowOutOfRange { row: max, rows: len });
            }
        }
        let mut keep = Vec::with_capacity(len - rows.len());
        let mut next = 0;
        for row in 0..len {
            if next < rows.len() && rows[next] == row {
                next += 1;
            } else {
                keep.push(row);
            }
        }
        self.shrink(&keep)
    }

    /// Drops every row from `n` on.
    pub fn truncate(&mut self, n: usize) {
        for col in &mut self.columns {
            col.data.truncate(n);
        }
    }

    /// Drops the last `n` columns (block bookkeeping strip).
    pub fn drop_tail_columns(&mut self, n: usize) {
        let keep = self.columns.len().saturating_sub(n);
        self.columns.truncate(keep);
    }

    /// Stable in-place sort of all rows by one key column.
    pub fn sort_by_column(&mut self, key: usize) -> Result<(), BatchError> {
        let col = self.column(key)?;
        if !col.data.is_sortable() {
            return Err(BatchError::Unsortable(col.name.clone()));
        }
        let mut perm: Vec<usize> = (0..self.len()).collect();
        let data = &self.columns[key].data;
        perm.sort_by(|&a, &b| data.try_cmp(a, b).unwrap_or(Ordering::Equal));
        for col in &mut self.columns {
            col.data.apply_permutation(&perm);
        }
        Ok(())
    }

    /// Renames every column to the canonical `col_N` attribute naming the
    /// block writer expects. Loaded blocks carry whatever attribute names
    /// they were written with; normalizing before a rewrite keeps the
    /// output schema stable.
    pub fn normalize_columns(&mut self) {
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.name = format!("col_{i}");
        }
    }
}
