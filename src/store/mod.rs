//! Persistence layer
//!
//! The pool, credential, and job stores are trait seams so the same core
//! logic runs against Postgres in production and an in-memory backend in
//! tests and single-process deployments. Store handles are injected
//! explicitly; their lifecycle is owned at the process entry point.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CredentialRecord, JobRecord, ProxyRecord, ProxyStage};

/// Persistent record of proxies, keyed by address, partitioned by stage
///
/// An address exists in at most one stage at a time; `promote` moves a record
/// between stages atomically (delete + insert), it never copies.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert the record unless its address already exists in any stage.
    /// Returns true if a new record was written.
    async fn upsert_if_absent(&self, record: ProxyRecord) -> Result<bool>;

    /// Fetch up to `limit` records from a stage, no ordering guarantee
    async fn find_batch(&self, stage: ProxyStage, limit: usize) -> Result<Vec<ProxyRecord>>;

    /// Delete the given addresses from a stage, returning the number removed
    async fn delete_many(&self, stage: ProxyStage, addresses: &[String]) -> Result<u64>;

    /// Atomically remove and return a record (single-use hand-out)
    async fn take(&self, stage: ProxyStage, address: &str) -> Result<Option<ProxyRecord>>;

    /// Move a record to another stage, refreshing `added_at`.
    /// Returns false if the record was not found in the source stage.
    async fn promote(&self, address: &str, from: ProxyStage, to: ProxyStage) -> Result<bool>;

    /// Refresh `last_tested_at` after a successful re-validation
    async fn touch(&self, stage: ProxyStage, address: &str) -> Result<()>;

    /// Number of records in a stage
    async fn count(&self, stage: ProxyStage) -> Result<i64>;
}

/// Store of API credentials with per-credential quota accounting
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(&self, key: &str, token_limit: i64) -> Result<CredentialRecord>;

    /// Credential with the smallest `tokens_used` among those below their
    /// limit, or None if every credential is exhausted
    async fn find_least_used_below_limit(&self) -> Result<Option<CredentialRecord>>;

    /// Atomically increment `tokens_used` by the units actually consumed
    async fn add_usage(&self, id: i64, used: i64) -> Result<()>;

    /// Force `tokens_used = token_limit` (quota unknowable or spent)
    async fn exhaust(&self, id: i64) -> Result<()>;

    /// Reset usage and refresh `created_at` for credentials created before
    /// the cutoff. Returns the number of credentials reset.
    async fn reset_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count(&self) -> Result<i64>;
}

/// Store of ingested job postings, keyed by external id
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert-only-if-absent write. Returns true if the record was inserted,
    /// false if the id already existed (payload left untouched).
    async fn insert_if_absent(&self, job: &JobRecord) -> Result<bool>;

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>>;

    async fn count(&self) -> Result<i64>;
}
