//! Persistence layer for job definitions.
//!
//! The scheduler talks to storage through the [`JobStore`] trait so the
//! registry stays independent of the on-disk format.

mod error;
pub mod file;

pub use error::{StorageError, StorageResult};

use async_trait::async_trait;

use crate::scheduler::Job;

/// Durable storage for the full job set.
///
/// The store is whole-set oriented: every mutation in the registry rewrites
/// all jobs, so implementations only need to load and replace.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load every stored job.
    ///
    /// Entries that cannot be parsed are skipped with a warning rather than
    /// failing the whole load. A missing store yields an empty list.
    async fn load_all(&self) -> StorageResult<Vec<Job>>;

    /// Replace the stored job set with `jobs`.
    async fn save_all(&self, jobs: &[Job]) -> StorageResult<()>;
}
