//! # Tidemark
//!
//! A watermark-driven **checkpoint rewrite engine** for a columnar
//! transactional storage engine. Given a checkpoint (a durable,
//! versioned snapshot of a table's block-level metadata) and a watermark
//! timestamp, tidemark produces a trimmed checkpoint that reflects the
//! database exactly as of the watermark: row mutations committed after
//! the watermark are discarded and the underlying object files are
//! physically rewritten so the exported snapshot is self-consistent and
//! standalone.
//!
//! ## Quick Start
//!
//! ```rust
//! use tidemark::checkpoint::{CHECKPOINT_VERSION, MetaStore};
//! use tidemark::store::{CheckpointIo, MemoryStore};
//! use tidemark::types::{SoftDeleteSet, Timestamp};
//! use tidemark::{RewriteConfig, rewrite_checkpoint};
//!
//! let store = MemoryStore::new();
//! let cfg = RewriteConfig::default();
//!
//! // Persist a (here: empty) checkpoint, then trim it at a watermark.
//! let meta = MetaStore::empty(CHECKPOINT_VERSION);
//! let persisted = store
//!     .persist_checkpoint(&meta, cfg.checkpoint_block_rows, cfg.checkpoint_size_limit)
//!     .unwrap();
//!
//! let output = rewrite_checkpoint(
//!     &store,
//!     &store,
//!     &persisted.meta_loc,
//!     &persisted.aux_loc,
//!     CHECKPOINT_VERSION,
//!     Timestamp(100),
//!     &SoftDeleteSet::new(),
//!     &cfg,
//! )
//! .unwrap();
//!
//! // Nothing to trim: the original locations come back, nothing is written.
//! assert_eq!(output.meta_loc, persisted.meta_loc);
//! assert!(output.files.is_empty());
//! ```
//!
//! ## Features
//!
//! - **Watermark trim** — tombstone rows committed after the watermark are
//!   excluded; data blocks are truncated at the first row past it.
//! - **Block promotion** — a surviving appendable block is merged with its
//!   tombstone, sorted, sealed, and relocated under a new name.
//! - **Metadata reconciliation** — relocations and promotions are folded
//!   back into the checkpoint's row-oriented metadata tables.
//! - **All-or-nothing** — a failing phase aborts the whole invocation; no
//!   partial checkpoint is ever persisted.
//! - **CRC32 integrity** — every block the in-memory store persists is
//!   checksummed.

pub mod batch;
pub mod checkpoint;
pub mod encoding;
pub mod rewrite;
pub mod store;
pub mod types;

use thiserror::Error;

pub use checkpoint::load_checkpoint_entries;
pub use rewrite::{RewriteError, RewriteOutput, rewrite_checkpoint};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for one rewrite invocation.
///
/// All fields have sensible defaults via [`RewriteConfig::default()`].
/// The configuration is validated at the top of
/// [`rewrite_checkpoint`].
///
/// # Example
///
/// ```rust
/// use tidemark::RewriteConfig;
///
/// // Use defaults
/// let cfg = RewriteConfig::default();
///
/// // Or customize
/// let cfg = RewriteConfig {
///     checkpoint_block_rows: 4096,
///     ..RewriteConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Maximum rows per physical block when persisting the new
    /// checkpoint.
    ///
    /// Default: 10 000. Must be ≥ 1.
    pub checkpoint_block_rows: usize,

    /// Size hint in bytes for the persisted checkpoint payload.
    ///
    /// Default: 512 MiB. Must be ≥ 1024.
    pub checkpoint_size_limit: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            checkpoint_block_rows: 10_000,
            checkpoint_size_limit: 512 * 1024 * 1024,
        }
    }
}

impl RewriteConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoint_block_rows < 1 {
            return Err(ConfigError::Invalid(
                "checkpoint_block_rows must be >= 1".into(),
            ));
        }
        if self.checkpoint_size_limit < 1024 {
            return Err(ConfigError::Invalid(
                "checkpoint_size_limit must be >= 1024".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Invalid configuration parameter.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}
