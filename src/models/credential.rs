use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// API credential with a hard per-period usage quota
///
/// `tokens_used` is monotonically non-decreasing within a quota period; the
/// only permitted decrease is the explicit stale-credential reset. Quota
/// exhaustion (or an invalid key, which makes the remaining quota unknowable)
/// is modeled by forcing `tokens_used = token_limit`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CredentialRecord {
    pub id: i64,
    #[serde(skip_serializing)]
    pub key: String,
    pub token_limit: i64,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Remaining quota units, never negative
    pub fn remaining(&self) -> i64 {
        (self.token_limit - self.tokens_used).max(0)
    }

    /// Whether this credential can still serve requests
    pub fn is_exhausted(&self) -> bool {
        self.tokens_used >= self.token_limit
    }
}
