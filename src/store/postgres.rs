//! Postgres store backend
//!
//! Production implementation of the store traits. Quota accounting and
//! insert-if-absent writes rely on single-statement atomicity (`ON CONFLICT
//! DO NOTHING`, in-place increments), so no extra locking is required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use super::{CredentialStore, JobStore, ProxyStore};
use crate::config::Config;
use crate::error::{Result, ScoutError};
use crate::models::{CredentialRecord, JobRecord, ProxyRecord, ProxyStage};

const PROXY_COLUMNS: &str =
    "address, stage, added_at, last_tested_at, consecutive_failures, score, cooldown_until";
const CREDENTIAL_COLUMNS: &str = "id, key, token_limit, tokens_used, created_at";
const JOB_COLUMNS: &str = "external_id, payload, processed, discovered_at";

/// Postgres-backed implementation of all three store traits
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database described by the configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        info!(
            host = %config.database.host,
            port = %config.database.port,
            database = %config.database.name,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.database.min_connections)
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60))
            .connect(&config.database_url())
            .await
            .map_err(|e| ScoutError::DatabaseConnection(e.to_string()))?;

        info!("Database connection pool established");

        Ok(PgStore { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proxies (
                address VARCHAR(32) PRIMARY KEY,
                stage VARCHAR(32) NOT NULL,
                added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_tested_at TIMESTAMPTZ,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                score DOUBLE PRECISION NOT NULL DEFAULT 1.0,
                cooldown_until TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_proxies_stage ON proxies (stage)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id BIGSERIAL PRIMARY KEY,
                key TEXT NOT NULL,
                token_limit BIGINT NOT NULL,
                tokens_used BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                external_id TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Check if the database is healthy
    pub async fn health_check(&self) -> Result<Duration> {
        let start = std::time::Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }
}

#[async_trait]
impl ProxyStore for PgStore {
    async fn upsert_if_absent(&self, record: ProxyRecord) -> Result<bool> {
        // The address-level primary key guarantees a proxy never occupies two
        // stages at once.
        let result = sqlx::query(
            r#"
            INSERT INTO proxies (address, stage, added_at, last_tested_at,
                                 consecutive_failures, score, cooldown_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(&record.address)
        .bind(record.stage)
        .bind(record.added_at)
        .bind(record.last_tested_at)
        .bind(record.consecutive_failures)
        .bind(record.score)
        .bind(record.cooldown_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_batch(&self, stage: ProxyStage, limit: usize) -> Result<Vec<ProxyRecord>> {
        let records = sqlx::query_as::<_, ProxyRecord>(&format!(
            "SELECT {} FROM proxies WHERE stage = $1 LIMIT $2",
            PROXY_COLUMNS
        ))
        .bind(stage)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete_many(&self, stage: ProxyStage, addresses: &[String]) -> Result<u64> {
        if addresses.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM proxies WHERE stage = $1 AND address = ANY($2)")
            .bind(stage)
            .bind(addresses)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn take(&self, stage: ProxyStage, address: &str) -> Result<Option<ProxyRecord>> {
        let record = sqlx::query_as::<_, ProxyRecord>(&format!(
            "DELETE FROM proxies WHERE stage = $1 AND address = $2 RETURNING {}",
            PROXY_COLUMNS
        ))
        .bind(stage)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn promote(&self, address: &str, from: ProxyStage, to: ProxyStage) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET stage = $3, added_at = NOW()
            WHERE address = $1 AND stage = $2
            "#,
        )
        .bind(address)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, stage: ProxyStage, address: &str) -> Result<()> {
        sqlx::query("UPDATE proxies SET last_tested_at = NOW() WHERE stage = $1 AND address = $2")
            .bind(stage)
            .bind(address)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn count(&self, stage: ProxyStage) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies WHERE stage = $1")
            .bind(stage)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert(&self, key: &str, token_limit: i64) -> Result<CredentialRecord> {
        let record = sqlx::query_as::<_, CredentialRecord>(&format!(
            "INSERT INTO credentials (key, token_limit) VALUES ($1, $2) RETURNING {}",
            CREDENTIAL_COLUMNS
        ))
        .bind(key)
        .bind(token_limit)
        .fetch_one(&self.pool)
        .await?;

        info!(id = record.id, "Registered credential");
        Ok(record)
    }

    async fn find_least_used_below_limit(&self) -> Result<Option<CredentialRecord>> {
        let record = sqlx::query_as::<_, CredentialRecord>(&format!(
            r#"
            SELECT {} FROM credentials
            WHERE tokens_used < token_limit
            ORDER BY tokens_used ASC, id ASC
            LIMIT 1
            "#,
            CREDENTIAL_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn add_usage(&self, id: i64, used: i64) -> Result<()> {
        sqlx::query("UPDATE credentials SET tokens_used = tokens_used + $2 WHERE id = $1")
            .bind(id)
            .bind(used)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn exhaust(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE credentials SET tokens_used = token_limit WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reset_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE credentials SET tokens_used = 0, created_at = NOW() WHERE created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_if_absent(&self, job: &JobRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (external_id, payload, processed, discovered_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(&job.external_id)
        .bind(&job.payload)
        .bind(job.processed)
        .bind(job.discovered_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, external_id: &str) -> Result<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM jobs WHERE external_id = $1",
            JOB_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
