//! Proxy source aggregation
//!
//! Downloads raw `host:port` candidates from public list and HTML sources,
//! normalizes them to strict `ip:port` syntax, and deduplicates across
//! sources. A single unreachable source is skipped; the aggregator only
//! fails when every source does.

use futures::StreamExt;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::error::{Result, ScoutError};
use crate::models::parse_proxy_address;

/// Built-in newline-delimited list sources
pub const DEFAULT_TEXT_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/http.txt",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/socks5.txt",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/socks4.txt",
    "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/http.txt",
    "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks5.txt",
    "https://raw.githubusercontent.com/themiralay/Proxy-List-World/master/data.txt",
    "https://raw.githubusercontent.com/shiftytr/proxy-list/master/proxy.txt",
    "https://api.proxyscrape.com/?request=getproxies&proxytype=http",
    "https://www.proxy-list.download/api/v1/get?type=http",
    "https://www.proxy-list.download/api/v1/get?type=https",
];

/// Built-in HTML table sources
pub const DEFAULT_HTML_SOURCES: &[&str] = &[
    "https://www.sslproxies.org/",
    "https://free-proxy-list.net/",
    "https://www.us-proxy.org/",
];

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0 Safari/537.36";

/// Sources are downloaded a few at a time; most of the win is overlapping
/// the slow ones, not raw parallelism.
const FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Text,
    Html,
}

/// Collects and normalizes proxy candidates from external sources
pub struct SourceAggregator {
    client: reqwest::Client,
    config: SourceConfig,
}

impl SourceAggregator {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ScoutError::Http(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// The effective source list (configured or built-in)
    fn sources(&self) -> Vec<(SourceKind, String)> {
        let text: Vec<String> = if self.config.text_sources.is_empty() {
            DEFAULT_TEXT_SOURCES.iter().map(|s| s.to_string()).collect()
        } else {
            self.config.text_sources.clone()
        };
        let html: Vec<String> = if self.config.html_sources.is_empty() {
            DEFAULT_HTML_SOURCES.iter().map(|s| s.to_string()).collect()
        } else {
            self.config.html_sources.clone()
        };

        text.into_iter()
            .map(|url| (SourceKind::Text, url))
            .chain(html.into_iter().map(|url| (SourceKind::Html, url)))
            .collect()
    }

    /// Fetch all sources and return a deduplicated set of `ip:port` addresses
    ///
    /// Stops early once `target_count` unique candidates are collected.
    pub async fn collect(&self) -> Result<HashSet<String>> {
        let sources = self.sources();
        let total_sources = sources.len();
        let mut failed_sources = 0usize;
        let mut collected: HashSet<String> = HashSet::new();

        let mut stream = futures::stream::iter(sources.into_iter().map(|(kind, url)| {
            async move {
                let body = self.fetch_with_retry(&url).await;
                (kind, url, body)
            }
        }))
        .buffer_unordered(FETCH_CONCURRENCY);

        while let Some((kind, url, body)) = stream.next().await {
            let Some(body) = body else {
                warn!(source = %url, "Proxy source skipped after all attempts failed");
                failed_sources += 1;
                continue;
            };

            let raw = match kind {
                SourceKind::Text => parse_text_source(&body),
                SourceKind::Html => parse_html_source(&body),
            };
            let before = collected.len();
            collected.extend(raw.iter().filter_map(|line| parse_proxy_address(line)));

            info!(
                source = %url,
                new = collected.len() - before,
                total = collected.len(),
                "Proxy source parsed"
            );

            if collected.len() >= self.config.target_count {
                info!(count = collected.len(), "Candidate target reached, stopping early");
                break;
            }
        }

        if failed_sources == total_sources {
            return Err(ScoutError::AllSourcesFailed(total_sources));
        }

        info!(count = collected.len(), "Proxy aggregation complete");
        Ok(collected)
    }

    /// Fetch one source with bounded retries, doubling the timeout each
    /// attempt
    async fn fetch_with_retry(&self, url: &str) -> Option<String> {
        for attempt in 1..=self.config.fetch_retries {
            let timeout = self.config.base_timeout * 2u32.pow(attempt - 1);

            match self.client.get(url).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(text) => return Some(text),
                    Err(e) => {
                        warn!(source = %url, attempt, error = %e, "Failed to read source body")
                    }
                },
                Ok(resp) => {
                    warn!(
                        source = %url,
                        attempt,
                        status = %resp.status(),
                        "Source responded with non-success status"
                    );
                }
                Err(e) => {
                    warn!(source = %url, attempt, error = %e, "Source request failed");
                }
            }

            if attempt < self.config.fetch_retries {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
        }
        None
    }
}

/// Parse newline-delimited `host:port` tokens
fn parse_text_source(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.contains(':'))
        .map(str::to_string)
        .collect()
}

/// Parse `ip` / `port` out of the first two cells of each HTML table row
fn parse_html_source(body: &str) -> Vec<String> {
    let doc = Html::parse_document(body);
    let row_selector = Selector::parse("table tbody tr").unwrap();
    let cell_selector = Selector::parse("td").unwrap();

    doc.select(&row_selector)
        .filter_map(|row| {
            let cells: Vec<_> = row.select(&cell_selector).collect();
            if cells.len() < 2 {
                return None;
            }
            let ip: String = cells[0].text().collect::<String>().trim().to_string();
            let port: String = cells[1].text().collect::<String>().trim().to_string();
            Some(format!("{}:{}", ip, port))
        })
        .collect()
}
