//! Reachability probing through candidate proxies

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

/// Seam for proxy reachability tests
///
/// The validator is generic over this trait so its stage logic can be tested
/// without the network.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Fetch `url` through the proxy at `address`.
    ///
    /// Returns the round-trip time on a successful (2xx) response, None on
    /// any failure including timeout.
    async fn probe(&self, address: &str, url: &str, timeout: Duration) -> Option<Duration>;
}

/// Real probe issuing one HTTP request per call through the candidate proxy
///
/// A fresh client is built per probe with connection pooling disabled; free
/// proxies rarely survive long enough for reuse to pay off.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProbe;

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, address: &str, url: &str, timeout: Duration) -> Option<Duration> {
        let proxy = match reqwest::Proxy::all(format!("http://{}", address)) {
            Ok(proxy) => proxy,
            Err(e) => {
                debug!(address, error = %e, "Cannot build proxy for probe");
                return None;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!(address, error = %e, "Cannot build probe client");
                return None;
            }
        };

        let start = Instant::now();
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => Some(start.elapsed()),
            Ok(resp) => {
                debug!(address, status = %resp.status(), "Probe rejected");
                None
            }
            Err(e) => {
                debug!(address, error = %e, "Probe failed");
                None
            }
        }
    }
}
