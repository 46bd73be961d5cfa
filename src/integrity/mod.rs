//! Sync integrity and repair
//!
//! Batch jobs that keep the relational store and the vector store in
//! agreement. None of them delete primary records.

pub mod batch;
pub mod cleanup;
pub mod freshness;
pub mod regenerate;
pub mod repair;

pub use batch::{BatchItem, BatchOutcome, BatchProgress, BatchRunner, CancellationToken, ItemError};
pub use cleanup::{CleanupReport, DanglingReference, ReferenceCleaner};
pub use freshness::{FreshnessReport, FreshnessScanner};
pub use regenerate::{RegenerationMode, RegenerationReport, Regenerator};
pub use repair::{RepairOptions, RepairReport, SyncRepairer};
