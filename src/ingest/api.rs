//! Job search API client
//!
//! Thin typed wrapper over the upstream search endpoint. Every response is
//! classified by status code at the call site: credential failures surface
//! immediately so the engine can rotate credentials, transient failures are
//! retried here with exponential backoff, and anything else propagates
//! untouched.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::error::{Result, ScoutError};

/// Sort key for search results
#[derive(Debug, Clone, Serialize)]
pub struct OrderBy {
    pub desc: bool,
    pub field: String,
}

impl OrderBy {
    fn asc(field: &str) -> Self {
        Self {
            desc: false,
            field: field.to_string(),
        }
    }
}

/// Search request body
///
/// A stable ascending sort order keeps page offsets consistent across the
/// whole sweep even while new jobs arrive upstream.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub offset: i64,
    pub limit: i64,
    pub blur_company_data: bool,
    pub include_total_results: bool,
    pub order_by: Vec<OrderBy>,
    pub posted_at_max_age_days: i64,
    pub job_country_code_or: Vec<String>,
}

impl SearchRequest {
    /// Minimal request used only to learn the total result count
    pub fn probe(config: &IngestConfig) -> Self {
        Self {
            offset: 0,
            limit: 1,
            include_total_results: true,
            ..Self::base(config)
        }
    }

    /// Request for one page of the planned sweep
    pub fn page(config: &IngestConfig, offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            include_total_results: false,
            ..Self::base(config)
        }
    }

    fn base(config: &IngestConfig) -> Self {
        Self {
            offset: 0,
            limit: 1,
            blur_company_data: false,
            include_total_results: false,
            order_by: vec![
                OrderBy::asc("date_posted"),
                OrderBy::asc("discovered_at"),
                OrderBy::asc("job_title"),
            ],
            posted_at_max_age_days: config.posted_max_age_days,
            job_country_code_or: config.country_codes.clone(),
        }
    }
}

/// One job posting as returned by the API
///
/// Only the identifier is required; everything else rides along in `extra`
/// and is persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_posted: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchMetadata {
    pub total_results: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<JobPosting>,
    #[serde(default)]
    pub metadata: Option<SearchMetadata>,
}

/// Seam for the upstream search endpoint
///
/// The engine is generic over this trait so pagination and credential
/// rotation can be tested against scripted responses.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, key: &str, request: &SearchRequest) -> Result<SearchResponse>;
}

/// Map a response status to its error class, `None` meaning success
fn classify_status(status: u16) -> Option<ScoutError> {
    match status {
        200..=299 => None,
        401 => Some(ScoutError::CredentialInvalid),
        402 | 403 => Some(ScoutError::CreditsExhausted),
        429 => Some(ScoutError::RateLimited),
        500..=599 => Some(ScoutError::Transient(format!("server error ({})", status))),
        other => Some(ScoutError::UnexpectedStatus { status: other }),
    }
}

/// Production client for the search endpoint
pub struct HttpSearchApi {
    client: reqwest::Client,
    search_url: String,
    max_attempts: u32,
}

impl HttpSearchApi {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScoutError::Http(e.to_string()))?;

        Ok(Self {
            client,
            search_url: format!("{}/search", config.api_base.trim_end_matches('/')),
            max_attempts: config.max_attempts,
        })
    }

    fn backoff(error: &ScoutError, attempt: u32) -> Duration {
        // Rate limiting backs off much harder than ordinary transient
        // failures; jitter spreads concurrent retries apart.
        let base_ms = match error {
            ScoutError::RateLimited => 5_000 * 2u64.pow(attempt - 1),
            _ => 500 * 2u64.pow(attempt),
        };
        let jitter = rand::thread_rng().gen_range(0..250);
        Duration::from_millis(base_ms + jitter)
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn search(&self, key: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let mut last_error = ScoutError::Transient("no attempts made".to_string());

        for attempt in 1..=self.max_attempts {
            let start = Instant::now();
            let result = self
                .client
                .post(&self.search_url)
                .bearer_auth(key.trim())
                .json(request)
                .send()
                .await;

            let error = match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match classify_status(status) {
                        None => {
                            let parsed = resp.json::<SearchResponse>().await?;
                            debug!(
                                attempt,
                                offset = request.offset,
                                limit = request.limit,
                                results = parsed.data.len(),
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "Search request succeeded"
                            );
                            return Ok(parsed);
                        }
                        Some(error) => error,
                    }
                }
                Err(e) => ScoutError::from(e),
            };

            if !error.is_transient() {
                return Err(error);
            }

            warn!(
                attempt,
                error = %error,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Search request failed"
            );

            if attempt < self.max_attempts {
                tokio::time::sleep(Self::backoff(&error, attempt)).await;
            }
            last_error = error;
        }

        Err(last_error)
    }
}
