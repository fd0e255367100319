use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Ingested job posting
///
/// `external_id` is the upstream API's unique key. Writes are
/// insert-only-if-absent: the first successful write for a given id is
/// authoritative and later writes are no-ops, so overlapping ingestion runs
/// never duplicate or overwrite data.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub external_id: String,
    /// Raw posting payload as returned by the API
    pub payload: Value,
    /// Set by the downstream analysis collaborator, never by the core
    pub processed: bool,
    pub discovered_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(external_id: impl Into<String>, payload: Value) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
            processed: false,
            discovered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_record_defaults() {
        let record = JobRecord::new("12345", json!({"job_title": "Rust Engineer"}));
        assert_eq!(record.external_id, "12345");
        assert!(!record.processed);
        assert_eq!(record.payload["job_title"], "Rust Engineer");
    }
}
