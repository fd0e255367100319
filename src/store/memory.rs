//! In-memory store backend
//!
//! Backs tests and single-process deployments. All operations are atomic at
//! the map-entry level, which is the discipline the validator and rotation
//! policy rely on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{CredentialStore, JobStore, ProxyStore};
use crate::error::Result;
use crate::models::{CredentialRecord, JobRecord, ProxyRecord, ProxyStage};

/// In-memory implementation of all three store traits
#[derive(Default)]
pub struct MemoryStore {
    proxies: DashMap<String, ProxyRecord>,
    credentials: DashMap<i64, CredentialRecord>,
    next_credential_id: AtomicI64,
    jobs: DashMap<String, JobRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            proxies: DashMap::new(),
            credentials: DashMap::new(),
            next_credential_id: AtomicI64::new(1),
            jobs: DashMap::new(),
        }
    }

    /// Rewrite a credential's creation time (test setup for reset logic)
    #[cfg(test)]
    pub(crate) fn backdate_credential(&self, id: i64, created_at: DateTime<Utc>) {
        if let Some(mut entry) = self.credentials.get_mut(&id) {
            entry.created_at = created_at;
        }
    }

    /// Read a credential directly by id (test inspection)
    #[cfg(test)]
    pub(crate) fn get_credential(&self, id: i64) -> Option<CredentialRecord> {
        self.credentials.get(&id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn upsert_if_absent(&self, record: ProxyRecord) -> Result<bool> {
        // Keyed by address alone, so an address can never occupy two stages.
        match self.proxies.entry(record.address.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
        }
    }

    async fn find_batch(&self, stage: ProxyStage, limit: usize) -> Result<Vec<ProxyRecord>> {
        let batch = self
            .proxies
            .iter()
            .filter(|entry| entry.value().stage == stage)
            .take(limit)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(batch)
    }

    async fn delete_many(&self, stage: ProxyStage, addresses: &[String]) -> Result<u64> {
        let mut removed = 0u64;
        for address in addresses {
            if self
                .proxies
                .remove_if(address, |_, record| record.stage == stage)
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn take(&self, stage: ProxyStage, address: &str) -> Result<Option<ProxyRecord>> {
        Ok(self
            .proxies
            .remove_if(address, |_, record| record.stage == stage)
            .map(|(_, record)| record))
    }

    async fn promote(&self, address: &str, from: ProxyStage, to: ProxyStage) -> Result<bool> {
        match self.proxies.get_mut(address) {
            Some(mut entry) if entry.stage == from => {
                entry.stage = to;
                entry.added_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, stage: ProxyStage, address: &str) -> Result<()> {
        if let Some(mut entry) = self.proxies.get_mut(address) {
            if entry.stage == stage {
                entry.last_tested_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn count(&self, stage: ProxyStage) -> Result<i64> {
        Ok(self
            .proxies
            .iter()
            .filter(|entry| entry.value().stage == stage)
            .count() as i64)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, key: &str, token_limit: i64) -> Result<CredentialRecord> {
        let id = self.next_credential_id.fetch_add(1, Ordering::SeqCst);
        let record = CredentialRecord {
            id,
            key: key.to_string(),
            token_limit,
            tokens_used: 0,
            created_at: Utc::now(),
        };
        self.credentials.insert(id, record.clone());
        Ok(record)
    }

    async fn find_least_used_below_limit(&self) -> Result<Option<CredentialRecord>> {
        let best = self
            .credentials
            .iter()
            .filter(|entry| !entry.value().is_exhausted())
            .map(|entry| entry.value().clone())
            // Tie-break on id so selection is deterministic.
            .min_by_key(|record| (record.tokens_used, record.id));
        Ok(best)
    }

    async fn add_usage(&self, id: i64, used: i64) -> Result<()> {
        if let Some(mut entry) = self.credentials.get_mut(&id) {
            entry.tokens_used += used;
        }
        Ok(())
    }

    async fn exhaust(&self, id: i64) -> Result<()> {
        if let Some(mut entry) = self.credentials.get_mut(&id) {
            entry.tokens_used = entry.token_limit;
        }
        Ok(())
    }

    async fn reset_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut reset = 0u64;
        for mut entry in self.credentials.iter_mut() {
            if entry.created_at < cutoff {
                entry.tokens_used = 0;
                entry.created_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.credentials.len() as i64)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_if_absent(&self, job: &JobRecord) -> Result<bool> {
        match self.jobs.entry(job.external_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(job.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.jobs.get(external_id).map(|entry| entry.value().clone()))
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.jobs.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_proxy_upsert_if_absent_is_a_noop_on_duplicates() {
        let store = MemoryStore::new();
        let record = ProxyRecord::new("1.2.3.4:8080", ProxyStage::HttpsVerified);

        assert!(store.upsert_if_absent(record.clone()).await.unwrap());
        assert!(!store.upsert_if_absent(record).await.unwrap());
        assert_eq!(ProxyStore::count(&store, ProxyStage::HttpsVerified).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_proxy_never_in_two_stages_at_once() {
        let store = MemoryStore::new();
        store
            .upsert_if_absent(ProxyRecord::new("1.2.3.4:8080", ProxyStage::HttpsVerified))
            .await
            .unwrap();

        // A second insert of the same address under another stage is rejected.
        assert!(!store
            .upsert_if_absent(ProxyRecord::new("1.2.3.4:8080", ProxyStage::TargetVerified))
            .await
            .unwrap());

        assert!(store
            .promote(
                "1.2.3.4:8080",
                ProxyStage::HttpsVerified,
                ProxyStage::TargetVerified
            )
            .await
            .unwrap());

        assert_eq!(ProxyStore::count(&store, ProxyStage::HttpsVerified).await.unwrap(), 0);
        assert_eq!(ProxyStore::count(&store, ProxyStage::TargetVerified).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promote_refreshes_added_at_and_requires_source_stage() {
        let store = MemoryStore::new();
        let mut record = ProxyRecord::new("1.2.3.4:8080", ProxyStage::HttpsVerified);
        record.added_at = Utc::now() - chrono::Duration::hours(1);
        let old_added_at = record.added_at;
        store.upsert_if_absent(record).await.unwrap();

        // Wrong source stage is a no-op.
        assert!(!store
            .promote(
                "1.2.3.4:8080",
                ProxyStage::Fetched,
                ProxyStage::TargetVerified
            )
            .await
            .unwrap());

        assert!(store
            .promote(
                "1.2.3.4:8080",
                ProxyStage::HttpsVerified,
                ProxyStage::TargetVerified
            )
            .await
            .unwrap());

        let batch = store.find_batch(ProxyStage::TargetVerified, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].added_at > old_added_at);
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryStore::new();
        store
            .upsert_if_absent(ProxyRecord::new("1.2.3.4:8080", ProxyStage::TargetVerified))
            .await
            .unwrap();

        let taken = store.take(ProxyStage::TargetVerified, "1.2.3.4:8080").await.unwrap();
        assert!(taken.is_some());

        let again = store.take(ProxyStage::TargetVerified, "1.2.3.4:8080").await.unwrap();
        assert!(again.is_none());
        assert_eq!(ProxyStore::count(&store, ProxyStage::TargetVerified).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_many_only_touches_matching_stage() {
        let store = MemoryStore::new();
        store
            .upsert_if_absent(ProxyRecord::new("1.2.3.4:8080", ProxyStage::HttpsVerified))
            .await
            .unwrap();
        store
            .upsert_if_absent(ProxyRecord::new("5.6.7.8:3128", ProxyStage::TargetVerified))
            .await
            .unwrap();

        let removed = store
            .delete_many(
                ProxyStage::HttpsVerified,
                &["1.2.3.4:8080".to_string(), "5.6.7.8:3128".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(ProxyStore::count(&store, ProxyStage::TargetVerified).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_credential_least_used_selection() {
        let store = MemoryStore::new();
        let a = store.insert("key-a", 200).await.unwrap();
        let b = store.insert("key-b", 200).await.unwrap();

        store.add_usage(a.id, 50).await.unwrap();
        store.add_usage(b.id, 10).await.unwrap();

        let selected = store.find_least_used_below_limit().await.unwrap().unwrap();
        assert_eq!(selected.id, b.id);

        store.exhaust(b.id).await.unwrap();
        let selected = store.find_least_used_below_limit().await.unwrap().unwrap();
        assert_eq!(selected.id, a.id);

        store.exhaust(a.id).await.unwrap();
        assert!(store.find_least_used_below_limit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_usage_is_monotone_between_resets() {
        let store = MemoryStore::new();
        let cred = store.insert("key-a", 200).await.unwrap();

        let mut last = 0;
        for used in [5, 0, 12, 3] {
            store.add_usage(cred.id, used).await.unwrap();
            let current = store
                .find_least_used_below_limit()
                .await
                .unwrap()
                .unwrap()
                .tokens_used;
            assert!(current >= last);
            last = current;
        }
    }

    #[tokio::test]
    async fn test_credential_reset_older_than() {
        let store = MemoryStore::new();
        let old = store.insert("key-old", 200).await.unwrap();
        let fresh = store.insert("key-fresh", 200).await.unwrap();

        store.add_usage(old.id, 150).await.unwrap();
        store.add_usage(fresh.id, 150).await.unwrap();

        // Backdate one credential past the cutoff.
        if let Some(mut entry) = store.credentials.get_mut(&old.id) {
            entry.created_at = Utc::now() - chrono::Duration::days(31);
        }

        let reset = store
            .reset_older_than(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let selected = store.find_least_used_below_limit().await.unwrap().unwrap();
        assert_eq!(selected.id, old.id);
        assert_eq!(selected.tokens_used, 0);
    }

    #[tokio::test]
    async fn test_job_double_upsert_keeps_first_payload() {
        let store = MemoryStore::new();
        let first = JobRecord::new("42", json!({"job_title": "Rust Engineer"}));
        let second = JobRecord::new("42", json!({"job_title": "Go Engineer"}));

        assert!(store.insert_if_absent(&first).await.unwrap());
        assert!(!store.insert_if_absent(&second).await.unwrap());

        let stored = store.get("42").await.unwrap().unwrap();
        assert_eq!(stored.payload["job_title"], "Rust Engineer");
        assert_eq!(JobStore::count(&store).await.unwrap(), 1);
    }
}
