//! Two-stage proxy validation
//!
//! Stage 1 checks generic HTTPS reachability against a neutral endpoint;
//! stage 2 checks that the proxy can reach the actual target site. Each
//! stage drains its input store in batches: survivors move forward, failures
//! are deleted and never retried. Probes fan out under a bounded concurrency
//! cap; the pool store is the only shared state and all of its operations
//! are atomic.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ValidatorConfig;
use crate::error::Result;
use crate::models::ProxyStage;
use crate::proxy::probe::ReachabilityProbe;
use crate::store::ProxyStore;

/// Runs reachability probes and moves records between pool stages
pub struct ProxyValidator {
    store: Arc<dyn ProxyStore>,
    probe: Arc<dyn ReachabilityProbe>,
    config: ValidatorConfig,
}

impl ProxyValidator {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        probe: Arc<dyn ReachabilityProbe>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            store,
            probe,
            config,
        }
    }

    /// Stage 1: drain fetched candidates against the neutral endpoint
    pub async fn drain_fetched_to_https(&self) -> Result<usize> {
        self.drain(
            ProxyStage::Fetched,
            ProxyStage::HttpsVerified,
            &self.config.probe_url,
            self.config.https_timeout,
        )
        .await
    }

    /// Stage 2: drain the HttpsVerified store against the target site
    pub async fn drain_https_to_target(&self) -> Result<usize> {
        self.drain(
            ProxyStage::HttpsVerified,
            ProxyStage::TargetVerified,
            &self.config.target_url,
            self.config.target_timeout,
        )
        .await
    }

    /// Drain one stage into the next until the source store is empty
    ///
    /// Passing records move forward with a refreshed `added_at`; failing
    /// records are deleted outright. Suitable for perpetual background
    /// operation. Returns the number of promoted records.
    async fn drain(
        &self,
        from: ProxyStage,
        to: ProxyStage,
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<usize> {
        let mut promoted_total = 0usize;

        loop {
            let batch = self.store.find_batch(from, self.config.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let addresses: Vec<String> = batch.into_iter().map(|r| r.address).collect();
            let results = self.probe_batch(addresses, url, timeout).await;

            let mut failed: Vec<String> = Vec::new();
            let mut promoted = 0usize;
            for (address, passed) in results {
                if passed {
                    if self.store.promote(&address, from, to).await? {
                        self.store.touch(to, &address).await?;
                        promoted += 1;
                    }
                } else {
                    failed.push(address);
                }
            }

            let evicted = self.store.delete_many(from, &failed).await?;

            promoted_total += promoted;
            info!(
                from = %from,
                to = %to,
                promoted,
                evicted,
                "Validation batch complete"
            );
        }

        Ok(promoted_total)
    }

    /// Re-test existing entries of a stage, evicting ones that now fail
    ///
    /// Used for pool health maintenance, not initial promotion. Returns
    /// (kept, evicted).
    pub async fn revalidate(&self, stage: ProxyStage) -> Result<(usize, usize)> {
        let (url, timeout) = match stage {
            ProxyStage::TargetVerified => {
                (self.config.target_url.clone(), self.config.target_timeout)
            }
            _ => (self.config.probe_url.clone(), self.config.https_timeout),
        };

        let batch = self.store.find_batch(stage, self.config.batch_size).await?;
        if batch.is_empty() {
            debug!(stage = %stage, "No proxies to re-validate");
            return Ok((0, 0));
        }

        let addresses: Vec<String> = batch.into_iter().map(|r| r.address).collect();
        let results = self.probe_batch(addresses, &url, timeout).await;

        let mut failed: Vec<String> = Vec::new();
        let mut kept = 0usize;
        for (address, passed) in results {
            if passed {
                self.store.touch(stage, &address).await?;
                kept += 1;
            } else {
                failed.push(address);
            }
        }

        let evicted = self.store.delete_many(stage, &failed).await? as usize;
        info!(stage = %stage, kept, evicted, "Re-validation pass complete");
        Ok((kept, evicted))
    }

    /// Fan probes out under the configured concurrency cap
    async fn probe_batch(
        &self,
        addresses: Vec<String>,
        url: &str,
        timeout: std::time::Duration,
    ) -> Vec<(String, bool)> {
        futures::stream::iter(addresses.into_iter().map(|address| {
            let probe = self.probe.clone();
            let url = url.to_string();
            async move {
                let passed = probe.probe(&address, &url, timeout).await.is_some();
                (address, passed)
            }
        }))
        .buffer_unordered(self.config.concurrency)
        .collect()
        .await
    }
}
