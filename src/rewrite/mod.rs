//! # Checkpoint Rewrite
//!
//! The engine that turns a checkpoint into its watermark-trimmed,
//! self-consistent replacement. One invocation runs the fixed pipeline
//!
//! `load -> index -> trim -> (unchanged exit | rewrite -> reconcile -> persist)`
//!
//! with no externally observable intermediate state: the caller receives
//! either a complete new checkpoint or an error with no metadata side
//! effects. A failing phase aborts the invocation; every loaded row
//! buffer is dropped with the arena on all exit paths.
//!
//! Error contract: I/O failures propagate; a destination-name collision
//! is recovered once by delete-and-retry inside the rewrite phase; and
//! corrupted or impossible metadata surfaces as
//! [`RewriteError::Invariant`], which callers must treat as a defect,
//! not a retryable condition.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

mod index;
mod promote;
mod reconcile;
mod trim;

pub use index::{BlockEntry, BlockKey, ObjectEntry, ObjectIndex, build_index};
pub use promote::{PendingPromotions, PromotedBlock, apply_delete, rewrite_objects};
pub use reconcile::reconcile;
pub use trim::{BOOKKEEPING_COLUMNS, trim_objects};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::batch::BatchError;
use crate::checkpoint::CheckpointError;
use crate::store::{BlockStore, CheckpointIo, StoreError};
use crate::types::{BlockLocation, SoftDeleteSet, Timestamp};
use crate::{ConfigError, RewriteConfig};
use thiserror::Error;
use tracing::{error, info};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the rewrite pipeline.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Storage collaborator failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Checkpoint metadata failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Row-level batch failure.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Corrupted metadata or caller misuse. Never retryable.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

// ------------------------------------------------------------------------------------------------
// Entry point
// ------------------------------------------------------------------------------------------------

/// Result of one rewrite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutput {
    /// Location of the (possibly unchanged) checkpoint metadata.
    pub meta_loc: BlockLocation,

    /// Location of the auxiliary location list.
    pub aux_loc: BlockLocation,

    /// Names of every file written; empty when the checkpoint was
    /// unchanged.
    pub files: Vec<String>,
}

fn fail(phase: &str, err: RewriteError) -> RewriteError {
    error!(phase, error = %err, "rewrite checkpoint failed");
    err
}

/// Rewrites the checkpoint at `meta_loc` so it reflects the database
/// state at `watermark`, writing new object files and a new checkpoint
/// to `dst`.
///
/// Blocks listed in `soft_deletes` were already reconciled by a previous
/// pass over a later checkpoint and are skipped. If the trim pass finds
/// nothing to cut, the original locations are returned with an empty
/// file list and nothing is written.
pub fn rewrite_checkpoint<S, D>(
    src: &S,
    dst: &D,
    meta_loc: &BlockLocation,
    aux_loc: &BlockLocation,
    version: u32,
    watermark: Timestamp,
    soft_deletes: &SoftDeleteSet,
    cfg: &RewriteConfig,
) -> Result<RewriteOutput, RewriteError>
where
    S: BlockStore + CheckpointIo + ?Sized,
    D: BlockStore + CheckpointIo + ?Sized,
{
    cfg.validate()?;
    info!(checkpoint = %meta_loc, watermark = %watermark, "rewrite checkpoint start");

    let mut store = src
        .load_checkpoint(meta_loc, version)
        .map_err(|e| fail("load", e.into()))?;
    store.validate().map_err(|e| fail("load", e.into()))?;

    let mut object_index =
        build_index(&store, watermark, soft_deletes).map_err(|e| fail("index", e))?;

    let changed =
        trim_objects(src, &mut object_index, watermark).map_err(|e| fail("trim", e))?;
    if !changed {
        info!(checkpoint = %meta_loc, "checkpoint unchanged at watermark");
        return Ok(RewriteOutput {
            meta_loc: *meta_loc,
            aux_loc: *aux_loc,
            files: Vec::new(),
        });
    }

    let (mut promotions, mut files) =
        rewrite_objects(src, dst, &mut object_index, &mut store)
            .map_err(|e| fail("rewrite", e))?;

    reconcile(&mut store, &mut promotions).map_err(|e| fail("reconcile", e))?;

    let persisted = dst
        .persist_checkpoint(&store, cfg.checkpoint_block_rows, cfg.checkpoint_size_limit)
        .map_err(|e| fail("persist", e.into()))?;
    files.extend(persisted.files.iter().cloned());

    info!(
        checkpoint = %persisted.meta_loc,
        files = files.len(),
        promoted = promotions.total(),
        "rewrite checkpoint done"
    );
    Ok(RewriteOutput {
        meta_loc: persisted.meta_loc,
        aux_loc: persisted.aux_loc,
        files,
    })
}
