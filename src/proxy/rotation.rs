//! Scored proxy rotation
//!
//! Hands out verified proxies one at a time. Each address carries a health
//! score adjusted by caller-reported outcomes; selection prefers the
//! highest-scoring eligible address and removes it from the pool so no two
//! callers ever share a proxy. When every candidate is excluded by failures
//! or cooldowns, the exclusions are cleared and selection retries once
//! rather than starving the caller.
//!
//! Health updates are process-local; the persisted record's score and
//! exclusion fields seed the in-memory state the first time an address is
//! seen, so a restarted process resumes from the last validated snapshot.
//! Running multiple policy instances against one shared pool store is safe
//! for hand-out (the store removal is atomic) but each instance tracks
//! health independently.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RotationConfig;
use crate::error::{Result, ScoutError};
use crate::models::{ProxyRecord, ProxyStage};
use crate::store::ProxyStore;

const SCORE_SUCCESS: f64 = 0.1;
const SCORE_FAST_BONUS: f64 = 0.05;
const SCORE_FAILURE: f64 = 0.2;
const SCORE_SLOW_PENALTY: f64 = 0.05;
const FAST_MS: u64 = 1_000;
const SLOW_MS: u64 = 5_000;

/// Per-address health tracked across hand-outs
#[derive(Debug, Clone)]
struct HealthState {
    score: f64,
    consecutive_failures: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            score: 1.0,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }
}

impl HealthState {
    fn from_record(record: &ProxyRecord) -> Self {
        Self {
            score: record.score,
            consecutive_failures: record.consecutive_failures.max(0) as u32,
            cooldown_until: record.cooldown_until,
        }
    }

    fn eligible(&self, now: DateTime<Utc>, max_failures: u32) -> bool {
        if self.consecutive_failures >= max_failures {
            return false;
        }
        match self.cooldown_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// Selects verified proxies for exclusive hand-out
pub struct RotationPolicy {
    store: Arc<dyn ProxyStore>,
    health: DashMap<String, HealthState>,
    config: RotationConfig,
}

impl RotationPolicy {
    pub fn new(store: Arc<dyn ProxyStore>, config: RotationConfig) -> Self {
        Self {
            store,
            health: DashMap::new(),
            config,
        }
    }

    /// Take the best eligible proxy out of the verified pool
    ///
    /// Returns `Ok(None)` only when the pool itself is empty. If candidates
    /// exist but all are excluded, exclusions are reset and selection runs
    /// again, so a non-empty pool always yields an address.
    pub async fn acquire(&self) -> Result<Option<String>> {
        for pass in 0..2 {
            let candidates = self
                .store
                .find_batch(ProxyStage::TargetVerified, self.config.candidate_limit)
                .await?;
            if candidates.is_empty() {
                debug!("Verified proxy pool is empty");
                return Ok(None);
            }

            let now = Utc::now();
            let mut pool: Vec<String> = Vec::with_capacity(candidates.len());
            let mut eligible: Vec<(String, f64)> = Vec::new();
            for record in candidates {
                // First sight of an address resumes the health carried on
                // its persisted record.
                let state = self
                    .health
                    .entry(record.address.clone())
                    .or_insert_with(|| HealthState::from_record(&record))
                    .value()
                    .clone();
                if state.eligible(now, self.config.max_failures) {
                    eligible.push((record.address.clone(), state.score));
                }
                pool.push(record.address);
            }

            if eligible.is_empty() {
                if pass == 0 {
                    warn!("All verified proxies excluded, clearing failure counters");
                    self.reset_exclusions(&pool);
                    continue;
                }
                return Ok(None);
            }

            // Highest score wins; ties break on address so selection is
            // deterministic for a given pool state.
            eligible.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });

            for (address, score) in eligible {
                // A concurrent caller may have taken it already; move on.
                if let Some(record) = self.store.take(ProxyStage::TargetVerified, &address).await? {
                    debug!(address = %record.address, score, "Proxy handed out");
                    return Ok(Some(record.address));
                }
            }
        }

        Ok(None)
    }

    /// Like `acquire`, but an empty pool is an error
    ///
    /// For callers that cannot proceed without a proxy.
    pub async fn acquire_required(&self) -> Result<String> {
        self.acquire().await?.ok_or(ScoutError::NoProxiesAvailable)
    }

    /// Report the outcome of using a handed-out proxy
    ///
    /// On success the score recovers and failure state clears. On failure the
    /// score drops, the failure counter grows, and the address enters
    /// cooldown. The address does not re-enter the pool either way; only a
    /// fresh validation cycle re-admits it.
    pub fn release(&self, address: &str, success: bool, latency_ms: Option<u64>) {
        let mut state = self.health.entry(address.to_string()).or_default();

        if success {
            state.score += SCORE_SUCCESS;
            if latency_ms.is_some_and(|ms| ms < FAST_MS) {
                state.score += SCORE_FAST_BONUS;
            }
            state.score = state.score.min(1.0);
            state.consecutive_failures = 0;
            state.cooldown_until = None;
        } else {
            state.score -= SCORE_FAILURE;
            if latency_ms.is_some_and(|ms| ms > SLOW_MS) {
                state.score -= SCORE_SLOW_PENALTY;
            }
            state.score = state.score.max(0.0);
            state.consecutive_failures += 1;
            state.cooldown_until = Some(
                Utc::now()
                    + chrono::Duration::from_std(self.config.cooldown)
                        .unwrap_or_else(|_| chrono::Duration::seconds(120)),
            );
        }

        debug!(
            address,
            success,
            score = state.score,
            failures = state.consecutive_failures,
            "Proxy outcome recorded"
        );
    }

    /// Clear failure counters and cooldowns pool-wide, keeping scores
    ///
    /// Health entries for addresses no longer in the pool are dropped so the
    /// map tracks only live candidates.
    fn reset_exclusions(&self, pool: &[String]) {
        let live: std::collections::HashSet<&str> = pool.iter().map(String::as_str).collect();
        self.health
            .retain(|address, _| live.contains(address.as_str()));

        let mut cleared = 0usize;
        for mut entry in self.health.iter_mut() {
            entry.consecutive_failures = 0;
            entry.cooldown_until = None;
            cleared += 1;
        }
        info!(cleared, "Rotation exclusions reset");
    }

    #[cfg(test)]
    fn score_of(&self, address: &str) -> f64 {
        self.health
            .get(address)
            .map(|s| s.score)
            .unwrap_or(1.0)
    }

    #[cfg(test)]
    fn failures_of(&self, address: &str) -> u32 {
        self.health
            .get(address)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn tracks(&self, address: &str) -> bool {
        self.health.contains_key(address)
    }
}
