//! Credential quota accounting
//!
//! Tracks API credentials and their consumed quota. Selection always picks
//! the credential with the fewest tokens used that still has quota left, so
//! consumption spreads evenly across the set.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::CredentialRecord;
use crate::store::CredentialStore;

pub struct CredentialQuotaManager {
    store: Arc<dyn CredentialStore>,
    reset_age_days: i64,
}

impl CredentialQuotaManager {
    pub fn new(store: Arc<dyn CredentialStore>, reset_age_days: i64) -> Self {
        Self {
            store,
            reset_age_days,
        }
    }

    /// Register a new credential with its quota
    pub async fn register(&self, key: &str, token_limit: i64) -> Result<CredentialRecord> {
        self.store.insert(key, token_limit).await
    }

    /// Pick the least-used credential that still has quota
    pub async fn select(&self) -> Result<Option<CredentialRecord>> {
        self.store.find_least_used_below_limit().await
    }

    /// Record tokens consumed against a credential
    ///
    /// Usage is attributed by results actually returned, so a clipped page
    /// never over-charges the credential.
    pub async fn mark_usage(&self, id: i64, used: i64) -> Result<()> {
        if used == 0 {
            return Ok(());
        }
        self.store.add_usage(id, used).await
    }

    /// Retire a credential for the rest of its quota period
    ///
    /// Called when the API rejects the credential outright; the usage counter
    /// is pinned to the limit so selection skips it until the next reset.
    pub async fn mark_exhausted(&self, id: i64) -> Result<()> {
        warn!(id, "Credential retired until quota reset");
        self.store.exhaust(id).await
    }

    /// Reset usage counters for credentials past their quota period
    pub async fn reset_stale(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.reset_age_days);
        let reset = self.store.reset_older_than(cutoff).await?;
        if reset > 0 {
            info!(reset, "Stale credential counters reset");
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> CredentialQuotaManager {
        CredentialQuotaManager::new(store, 30)
    }

    #[tokio::test]
    async fn test_select_prefers_least_used() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone());

        let a = mgr.register("key-a", 200).await.unwrap();
        let b = mgr.register("key-b", 200).await.unwrap();

        mgr.mark_usage(a.id, 50).await.unwrap();
        mgr.mark_usage(b.id, 10).await.unwrap();

        let selected = mgr.select().await.unwrap().unwrap();
        assert_eq!(selected.id, b.id);
        assert_eq!(selected.remaining(), 190);
    }

    #[tokio::test]
    async fn test_select_skips_exhausted() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store);

        let a = mgr.register("key-a", 100).await.unwrap();
        let b = mgr.register("key-b", 100).await.unwrap();

        mgr.mark_exhausted(a.id).await.unwrap();
        let selected = mgr.select().await.unwrap().unwrap();
        assert_eq!(selected.id, b.id);

        mgr.mark_exhausted(b.id).await.unwrap();
        assert!(mgr.select().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_usage_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store);

        let a = mgr.register("key-a", 100).await.unwrap();
        mgr.mark_usage(a.id, 0).await.unwrap();

        let selected = mgr.select().await.unwrap().unwrap();
        assert_eq!(selected.tokens_used, 0);
    }

    #[tokio::test]
    async fn test_reset_stale_only_touches_old_credentials() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone());

        let a = mgr.register("key-a", 100).await.unwrap();
        let b = mgr.register("key-b", 100).await.unwrap();
        mgr.mark_usage(a.id, 100).await.unwrap();
        mgr.mark_usage(b.id, 40).await.unwrap();

        // Backdate one credential past the quota period.
        store.backdate_credential(a.id, Utc::now() - Duration::days(45));

        assert_eq!(mgr.reset_stale().await.unwrap(), 1);

        let selected = mgr.select().await.unwrap().unwrap();
        assert_eq!(selected.id, a.id);
        assert_eq!(selected.tokens_used, 0);
    }
}
