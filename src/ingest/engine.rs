//! Paginated ingestion engine
//!
//! One run sweeps the upstream search space: probe the total result count,
//! plan fixed-size pages, then fetch each page with the least-used
//! credential. A credential rejected mid-page is retired and the same page
//! retried with the next one; duplicates across retries are absorbed by
//! insert-if-absent writes, so a retried page never double-ingests.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::{Result, ScoutError};
use crate::ingest::api::{SearchApi, SearchRequest, SearchResponse};
use crate::ingest::credentials::CredentialQuotaManager;
use crate::models::{CredentialRecord, JobRecord};
use crate::store::JobStore;

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_available: i64,
    pub jobs_ingested: u64,
    pub jobs_duplicate: u64,
    pub pages_ok: u32,
    pub pages_failed: u32,
}

/// Split a result count into `(offset, limit)` pages under the API page cap
///
/// The final page carries the remainder, so offsets tile the space exactly.
pub fn page_plan(total: i64, cap: i64) -> Vec<(i64, i64)> {
    let mut pages = Vec::new();
    let mut offset = 0;
    while offset < total {
        let limit = cap.min(total - offset);
        pages.push((offset, limit));
        offset += limit;
    }
    pages
}

/// Drives one full probe-plan-page sweep against the search API
pub struct IngestionEngine {
    api: Arc<dyn SearchApi>,
    credentials: CredentialQuotaManager,
    jobs: Arc<dyn JobStore>,
    config: IngestConfig,
}

impl IngestionEngine {
    pub fn new(
        api: Arc<dyn SearchApi>,
        credentials: CredentialQuotaManager,
        jobs: Arc<dyn JobStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            api,
            credentials,
            jobs,
            config,
        }
    }

    /// Execute one ingestion run
    ///
    /// A failed page aborts the rest of the sweep (later offsets would skip
    /// the gap), but the report for the completed portion is still returned.
    /// Only pre-sweep failures surface as errors.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<IngestReport> {
        self.credentials.reset_stale().await?;

        let total = self.probe_total().await?;
        let mut report = IngestReport {
            total_available: total,
            ..Default::default()
        };

        if total == 0 {
            info!("No results available, nothing to ingest");
            return Ok(report);
        }

        let plan = page_plan(total, self.config.page_cap);
        info!(total, pages = plan.len(), "Starting ingestion sweep");

        for (offset, limit) in plan {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping sweep at a page boundary");
                break;
            }

            match self.process_page(offset, limit).await {
                Ok((inserted, duplicate)) => {
                    report.jobs_ingested += inserted;
                    report.jobs_duplicate += duplicate;
                    report.pages_ok += 1;
                }
                Err(e) => {
                    warn!(offset, limit, error = %e, "Page failed, aborting sweep");
                    report.pages_failed += 1;
                    break;
                }
            }
        }

        info!(
            ingested = report.jobs_ingested,
            duplicate = report.jobs_duplicate,
            pages_ok = report.pages_ok,
            pages_failed = report.pages_failed,
            "Ingestion run complete"
        );
        Ok(report)
    }

    /// Learn the total result count with a minimal one-result request
    async fn probe_total(&self) -> Result<i64> {
        let response = self
            .request_with_switches(|_| SearchRequest::probe(&self.config))
            .await?;

        let total = response
            .metadata
            .ok_or_else(|| {
                ScoutError::MalformedResponse("probe response missing metadata".to_string())
            })?
            .total_results;

        info!(total, "Probe complete");
        Ok(total)
    }

    /// Fetch one page and persist its jobs
    ///
    /// Returns (inserted, duplicate) counts.
    async fn process_page(&self, offset: i64, limit: i64) -> Result<(u64, u64)> {
        let response = self
            .request_with_switches(|credential| {
                SearchRequest::page(&self.config, offset, limit.min(credential.remaining()))
            })
            .await?;

        let mut inserted = 0u64;
        let mut duplicate = 0u64;
        for job in &response.data {
            let record = JobRecord::new(job.id.to_string(), serde_json::to_value(job)?);
            if self.jobs.insert_if_absent(&record).await? {
                inserted += 1;
            } else {
                duplicate += 1;
            }
        }

        info!(offset, limit, inserted, duplicate, "Page ingested");
        Ok((inserted, duplicate))
    }

    /// Issue a request, rotating credentials on rejection
    ///
    /// The request is rebuilt for each selected credential so the page limit
    /// can be clipped to that credential's remaining quota. Usage is charged
    /// by results actually returned. Credential rejections consume one of
    /// the bounded switches; any other error propagates.
    async fn request_with_switches<F>(&self, build: F) -> Result<SearchResponse>
    where
        F: Fn(&CredentialRecord) -> SearchRequest,
    {
        for _ in 0..self.config.credential_switches {
            let Some(credential) = self.credentials.select().await? else {
                return Err(ScoutError::NoCredentialAvailable);
            };

            let request = build(&credential);
            match self.api.search(&credential.key, &request).await {
                Ok(response) => {
                    self.credentials
                        .mark_usage(credential.id, response.data.len() as i64)
                        .await?;
                    return Ok(response);
                }
                Err(e) if e.is_credential_failure() => {
                    warn!(credential_id = credential.id, error = %e, "Switching credential");
                    self.credentials.mark_exhausted(credential.id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ScoutError::NoCredentialAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::api::{JobPosting, SearchMetadata};
    use crate::store::{CredentialStore, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted API double that replays queued responses and records calls
    struct ScriptedApi {
        responses: Mutex<VecDeque<Result<SearchResponse>>>,
        calls: Mutex<Vec<(String, i64, i64)>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<SearchResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, i64, i64)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SearchApi for ScriptedApi {
        async fn search(&self, key: &str, request: &SearchRequest) -> Result<SearchResponse> {
            self.calls
                .lock()
                .push((key.to_string(), request.offset, request.limit));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ScoutError::Internal("script exhausted".to_string())))
        }
    }

    fn jobs(ids: std::ops::Range<i64>) -> Vec<JobPosting> {
        ids.map(|id| JobPosting {
            id,
            job_title: Some(format!("Job {}", id)),
            date_posted: None,
            extra: serde_json::Map::new(),
        })
        .collect()
    }

    fn probe_response(total: i64) -> Result<SearchResponse> {
        Ok(SearchResponse {
            data: vec![],
            metadata: Some(SearchMetadata {
                total_results: total,
            }),
        })
    }

    fn page_response(ids: std::ops::Range<i64>) -> Result<SearchResponse> {
        Ok(SearchResponse {
            data: jobs(ids),
            metadata: None,
        })
    }

    fn ingest_config() -> IngestConfig {
        IngestConfig {
            api_base: "https://api.example/v1/jobs".to_string(),
            page_cap: 200,
            max_attempts: 3,
            credential_switches: 3,
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            credential_reset_age_days: 30,
            posted_max_age_days: 1,
            country_codes: vec!["TR".to_string()],
            api_keys: vec![],
            token_limit: 200,
        }
    }

    struct Harness {
        engine: IngestionEngine,
        api: Arc<ScriptedApi>,
        store: Arc<MemoryStore>,
        shutdown_rx: watch::Receiver<bool>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness(responses: Vec<Result<SearchResponse>>) -> Harness {
        let api = ScriptedApi::new(responses);
        let store = Arc::new(MemoryStore::new());
        let credentials = CredentialQuotaManager::new(store.clone(), 30);
        let engine = IngestionEngine::new(
            api.clone(),
            credentials,
            store.clone(),
            ingest_config(),
        );
        let (tx, rx) = watch::channel(false);
        Harness {
            engine,
            api,
            store,
            shutdown_rx: rx,
            _shutdown_tx: tx,
        }
    }

    #[test]
    fn test_page_plan_tiles_the_space() {
        assert_eq!(page_plan(450, 200), vec![(0, 200), (200, 200), (400, 50)]);
        assert_eq!(page_plan(200, 200), vec![(0, 200)]);
        assert_eq!(page_plan(1, 200), vec![(0, 1)]);
        assert_eq!(page_plan(0, 200), Vec::<(i64, i64)>::new());
    }

    #[tokio::test]
    async fn test_zero_total_is_an_early_success() {
        let h = harness(vec![probe_response(0)]);
        h.store.insert("key-a", 200).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(report.total_available, 0);
        assert_eq!(report.pages_ok, 0);
        assert_eq!(report.jobs_ingested, 0);
        // Only the probe hit the API.
        assert_eq!(h.api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_full_sweep_ingests_every_page() {
        let h = harness(vec![
            probe_response(450),
            page_response(0..200),
            page_response(200..400),
            page_response(400..450),
        ]);
        h.store.insert("key-a", 10_000).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(report.total_available, 450);
        assert_eq!(report.jobs_ingested, 450);
        assert_eq!(report.jobs_duplicate, 0);
        assert_eq!(report.pages_ok, 3);
        assert_eq!(report.pages_failed, 0);

        let calls = h.api.calls();
        assert_eq!(
            calls.iter().map(|c| (c.1, c.2)).collect::<Vec<_>>(),
            vec![(0, 1), (0, 200), (200, 200), (400, 50)]
        );
        assert_eq!(JobStore::count(h.store.as_ref()).await.unwrap(), 450);
    }

    #[tokio::test]
    async fn test_page_limit_clips_to_remaining_quota() {
        let h = harness(vec![
            probe_response(400),
            page_response(0..10),
            page_response(200..205),
        ]);
        let x = h.store.insert("key-x", 200).await.unwrap();
        let y = h.store.insert("key-y", 200).await.unwrap();
        h.store.add_usage(x.id, 190).await.unwrap();
        h.store.add_usage(y.id, 195).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        let calls = h.api.calls();
        // Probe goes to the least-used credential (x).
        assert_eq!(calls[0], ("key-x".to_string(), 0, 1));
        // First page: x still least used, limit clipped from 200 to its 10
        // remaining tokens. The 10 results exhaust x exactly.
        assert_eq!(calls[1], ("key-x".to_string(), 0, 10));
        // Second page: only y has quota left; clipped to its 5 remaining.
        assert_eq!(calls[2], ("key-y".to_string(), 200, 5));

        assert_eq!(report.pages_ok, 2);
        assert_eq!(report.jobs_ingested, 15);
    }

    #[tokio::test]
    async fn test_rejected_credential_retries_same_page() {
        let h = harness(vec![
            probe_response(200),
            Err(ScoutError::CredentialInvalid),
            page_response(0..200),
        ]);
        let a = h.store.insert("key-a", 1_000).await.unwrap();
        let b = h.store.insert("key-b", 1_000).await.unwrap();
        // Make a the first choice for probe and page alike.
        let _ = (a, b);

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        let calls = h.api.calls();
        assert_eq!(calls[0].0, "key-a");
        // The same page offset is retried with the next credential.
        assert_eq!(calls[1], ("key-a".to_string(), 0, 200));
        assert_eq!(calls[2], ("key-b".to_string(), 0, 200));

        // The rejected credential is pinned at its limit.
        let retired = h.store.get_credential(1).unwrap();
        assert_eq!(retired.tokens_used, retired.token_limit);

        assert_eq!(report.pages_ok, 1);
        assert_eq!(report.jobs_ingested, 200);
        assert_eq!(report.pages_failed, 0);
    }

    #[tokio::test]
    async fn test_retried_page_deduplicates_overlap() {
        // First page succeeds, second page overlaps it after a retry.
        let h = harness(vec![
            probe_response(300),
            page_response(0..200),
            Err(ScoutError::CreditsExhausted),
            page_response(150..300),
        ]);
        h.store.insert("key-a", 10_000).await.unwrap();
        h.store.insert("key-b", 10_000).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(report.jobs_ingested, 300);
        assert_eq!(report.jobs_duplicate, 50);
        assert_eq!(JobStore::count(h.store.as_ref()).await.unwrap(), 300);

        // The first payload stays authoritative for overlapping ids.
        let stored = h.store.get("150").await.unwrap().unwrap();
        assert_eq!(stored.payload["job_title"], "Job 150");
    }

    #[tokio::test]
    async fn test_all_switches_exhausted_fails_the_page_and_stops() {
        let h = harness(vec![
            probe_response(600),
            Err(ScoutError::CreditsExhausted),
            Err(ScoutError::CreditsExhausted),
            Err(ScoutError::CreditsExhausted),
        ]);
        h.store.insert("key-a", 1_000).await.unwrap();
        h.store.insert("key-b", 1_000).await.unwrap();
        h.store.insert("key-c", 1_000).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(report.pages_ok, 0);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.jobs_ingested, 0);
        // Probe plus three rejected attempts, no later pages.
        assert_eq!(h.api.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_probe_without_metadata_is_malformed() {
        let h = harness(vec![Ok(SearchResponse {
            data: vec![],
            metadata: None,
        })]);
        h.store.insert("key-a", 1_000).await.unwrap();

        let err = h.engine.run(h.shutdown_rx.clone()).await.unwrap_err();
        assert!(matches!(err, ScoutError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_run_without_credentials_is_terminal() {
        let h = harness(vec![]);
        let err = h.engine.run(h.shutdown_rx.clone()).await.unwrap_err();
        assert!(matches!(err, ScoutError::NoCredentialAvailable));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_page_error_aborts_but_reports() {
        let h = harness(vec![
            probe_response(400),
            page_response(0..200),
            Err(ScoutError::Transient("server error (503)".to_string())),
        ]);
        h.store.insert("key-a", 10_000).await.unwrap();

        let report = h.engine.run(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(report.pages_ok, 1);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.jobs_ingested, 200);
        // The sweep stops at the failed page instead of skipping past it.
        assert_eq!(h.api.calls().len(), 3);
    }
}
