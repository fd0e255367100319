//! Background pool maintenance
//!
//! Periodically refills the candidate pool from external sources and drives
//! both validation stages, so the verified pool keeps a supply of working
//! proxies while the rotation policy consumes them.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::models::{ProxyRecord, ProxyStage};
use crate::proxy::sources::SourceAggregator;
use crate::proxy::validator::ProxyValidator;
use crate::store::ProxyStore;

/// Counters describing monitor activity since startup
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub total_fetches: u64,
    pub total_target_tests: u64,
    /// Promotions into the https-verified stage since startup
    pub total_https_promoted: usize,
    /// Promotions into the target-verified stage since startup
    pub total_target_promoted: usize,
    pub last_fetch: Option<chrono::DateTime<chrono::Utc>>,
    pub last_target_test: Option<chrono::DateTime<chrono::Utc>>,
}

/// Point-in-time pool sizes per stage
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub fetched: i64,
    pub https_verified: i64,
    pub target_verified: i64,
}

/// Keeps the proxy pool populated in the background
pub struct ProxyMonitor {
    aggregator: SourceAggregator,
    validator: ProxyValidator,
    store: Arc<dyn ProxyStore>,
    config: MonitorConfig,
    stats: RwLock<MonitorStats>,
}

impl ProxyMonitor {
    pub fn new(
        aggregator: SourceAggregator,
        validator: ProxyValidator,
        store: Arc<dyn ProxyStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            aggregator,
            validator,
            store,
            config,
            stats: RwLock::new(MonitorStats::default()),
        }
    }

    /// Run the monitor loop (call in a spawned task)
    ///
    /// A cycle failure is logged and the loop continues; only shutdown stops
    /// it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            fetch_interval_secs = self.config.fetch_interval.as_secs(),
            target_test_interval_secs = self.config.target_test_interval.as_secs(),
            "Starting proxy monitor"
        );

        let mut fetch_interval = interval(self.config.fetch_interval);
        let mut target_interval = interval(self.config.target_test_interval);

        loop {
            tokio::select! {
                _ = fetch_interval.tick() => {
                    if let Err(e) = self.fetch_cycle().await {
                        error!(error = %e, "Fetch cycle failed");
                    }
                }
                _ = target_interval.tick() => {
                    if let Err(e) = self.target_cycle().await {
                        error!(error = %e, "Target test cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Proxy monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Pull fresh candidates from sources and run stage-1 verification
    ///
    /// The insert-if-absent intake is the dedup pass: an address already in
    /// any stage is left where it is.
    async fn fetch_cycle(&self) -> Result<()> {
        let candidates = self.aggregator.collect().await?;

        let mut inserted = 0usize;
        for address in candidates {
            if self
                .store
                .upsert_if_absent(ProxyRecord::new(address, ProxyStage::Fetched))
                .await?
            {
                inserted += 1;
            }
        }
        info!(inserted, "Fetched candidates staged");

        let verified = self.validator.drain_fetched_to_https().await?;

        let mut stats = self.stats.write();
        stats.total_fetches += 1;
        stats.total_https_promoted += verified;
        stats.last_fetch = Some(chrono::Utc::now());

        Ok(())
    }

    /// Promote stage-1 survivors and re-test the verified pool
    async fn target_cycle(&self) -> Result<()> {
        let promoted = self.validator.drain_https_to_target().await?;
        let (kept, evicted) = self.validator.revalidate(ProxyStage::TargetVerified).await?;

        info!(promoted, kept, evicted, "Target test cycle complete");

        let mut stats = self.stats.write();
        stats.total_target_tests += 1;
        stats.total_target_promoted += promoted;
        stats.last_target_test = Some(chrono::Utc::now());

        Ok(())
    }

    /// Snapshot of activity counters
    pub fn stats(&self) -> MonitorStats {
        self.stats.read().clone()
    }

    /// Current pool sizes per stage
    pub async fn pool_stats(&self) -> Result<PoolStats> {
        Ok(PoolStats {
            fetched: self.store.count(ProxyStage::Fetched).await?,
            https_verified: self.store.count(ProxyStage::HttpsVerified).await?,
            target_verified: self.store.count(ProxyStage::TargetVerified).await?,
        })
    }
}

/// Guard for managing monitor lifecycle
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for MonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, ValidatorConfig};
    use crate::models::ProxyRecord;
    use crate::proxy::probe::ReachabilityProbe;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysUpProbe;

    #[async_trait]
    impl ReachabilityProbe for AlwaysUpProbe {
        async fn probe(&self, _: &str, _: &str, _: Duration) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
    }

    fn build_monitor(store: Arc<MemoryStore>) -> ProxyMonitor {
        // Unreachable sources keep the fetch cycle off the network in tests.
        let aggregator = SourceAggregator::new(SourceConfig {
            text_sources: vec!["http://127.0.0.1:1/list.txt".to_string()],
            html_sources: vec!["http://127.0.0.1:1/table.html".to_string()],
            target_count: 100,
            fetch_retries: 1,
            base_timeout: Duration::from_secs(1),
        })
        .unwrap();
        let validator = ProxyValidator::new(
            store.clone(),
            Arc::new(AlwaysUpProbe),
            ValidatorConfig {
                concurrency: 8,
                probe_url: "https://probe.example/ip".to_string(),
                target_url: "https://target.example".to_string(),
                https_timeout: Duration::from_secs(1),
                target_timeout: Duration::from_secs(1),
                batch_size: 50,
            },
        );
        ProxyMonitor::new(
            aggregator,
            validator,
            store,
            MonitorConfig {
                fetch_interval: Duration::from_secs(900),
                target_test_interval: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test]
    async fn test_target_cycle_promotes_and_updates_stats() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_if_absent(ProxyRecord::new("1.2.3.4:8080", ProxyStage::HttpsVerified))
            .await
            .unwrap();

        let monitor = build_monitor(store.clone());
        monitor.target_cycle().await.unwrap();

        let stats = monitor.stats();
        assert_eq!(stats.total_target_tests, 1);
        assert_eq!(stats.total_target_promoted, 1);
        assert!(stats.last_target_test.is_some());

        let pool = monitor.pool_stats().await.unwrap();
        assert_eq!(pool.https_verified, 0);
        assert_eq!(pool.target_verified, 1);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let monitor = Arc::new(build_monitor(store));
        let (handle, shutdown_rx) = MonitorHandle::new();

        let task = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run(shutdown_rx).await })
        };

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("monitor did not stop on shutdown")
            .unwrap();
    }
}
