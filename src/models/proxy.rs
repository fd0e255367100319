use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Position of a proxy in the validation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProxyStage {
    Fetched,
    HttpsVerified,
    TargetVerified,
}

impl ProxyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStage::Fetched => "fetched",
            ProxyStage::HttpsVerified => "https_verified",
            ProxyStage::TargetVerified => "target_verified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fetched" => Some(ProxyStage::Fetched),
            "https_verified" => Some(ProxyStage::HttpsVerified),
            "target_verified" => Some(ProxyStage::TargetVerified),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy pool entity
///
/// A record lives in exactly one stage at a time; promotion between stages is
/// a move, not a copy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProxyRecord {
    /// `ip:port` address, unique across all stages
    pub address: String,
    pub stage: ProxyStage,
    pub added_at: DateTime<Utc>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub score: f64,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// Create a fresh record in the given stage
    pub fn new(address: impl Into<String>, stage: ProxyStage) -> Self {
        Self {
            address: address.into(),
            stage,
            added_at: Utc::now(),
            last_tested_at: None,
            consecutive_failures: 0,
            score: 1.0,
            cooldown_until: None,
        }
    }

    /// Whether the cooldown window (if any) has elapsed
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.cooldown_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// Parse a raw candidate into a canonical `ip:port` address
///
/// Accepts an optional `http://` / `https://` prefix. Only strict IPv4
/// addresses with a port in 1..=65535 pass; everything else is rejected.
pub fn parse_proxy_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    let (host, port) = rest.rsplit_once(':')?;
    let ip = Ipv4Addr::from_str(host).ok()?;
    let port: u32 = port.parse().ok()?;
    if !(1..=65_535).contains(&port) {
        return None;
    }

    Some(format!("{}:{}", ip, port))
}
