//! SQLite-backed job store (durable).
//!
//! Layout: one `jobs` table. Timestamps are INTEGER milliseconds since the
//! epoch, payload/result are JSON text.
//!
//! Atomicity:
//! - claim is a single `UPDATE ... WHERE id = (SELECT ... LIMIT 1) AND <eligible> RETURNING`
//! - every other transition is an `UPDATE ... WHERE id = ? AND <expectation>`
//!   checked through `rows_affected()`
//! - the partial unique index on `idempotency_key` for active statuses is the
//!   dedup safety net for concurrent submissions

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::domain::{IdempotencyKey, JobId, JobRecord, JobStatus, SpoolError, WorkerId};
use crate::observability::JobCounts;
use crate::ports::{Expectation, InsertOutcome, JobStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        seq             INTEGER PRIMARY KEY AUTOINCREMENT,
        id              TEXT    NOT NULL UNIQUE,
        idempotency_key TEXT    NOT NULL,
        submitter       TEXT    NULL,
        payload         TEXT    NOT NULL,
        status          TEXT    NOT NULL,
        result          TEXT    NULL,
        error_message   TEXT    NULL,
        retry_count     INTEGER NOT NULL DEFAULT 0,
        max_retries     INTEGER NOT NULL,
        next_retry_at   INTEGER NULL,
        timeout_seconds INTEGER NOT NULL,
        locked_at       INTEGER NULL,
        locked_by       TEXT    NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        completed_at    INTEGER NULL,
        CHECK ((locked_at IS NULL) = (locked_by IS NULL)),
        CHECK (retry_count <= max_retries)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_claim_idx ON jobs (status, next_retry_at, locked_at)",
    "CREATE INDEX IF NOT EXISTS jobs_stale_idx ON jobs (status, locked_at)",
    "CREATE INDEX IF NOT EXISTS jobs_key_idx ON jobs (idempotency_key, created_at)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS jobs_active_key_idx
        ON jobs (idempotency_key)
        WHERE status IN ('pending', 'processing')
    "#,
];

const COLUMNS: &str = "id, idempotency_key, submitter, payload, status, result, error_message, \
     retry_count, max_retries, next_retry_at, timeout_seconds, locked_at, locked_by, \
     created_at, updated_at, completed_at";

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Connect (creating the database file if needed) and apply the schema.
    ///
    /// In-memory URLs are limited to one connection: every SQLite memory
    /// connection is a separate database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, SpoolError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = if in_memory {
            // the database lives exactly as long as its single connection
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        }
        .connect_with(options)
        .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(url, "sqlite job store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The schema must already be applied (see `migrate`).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), SpoolError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        bind: &str,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let row = sqlx::query(sql).bind(bind).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode_job).transpose()
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(millis)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, SpoolError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SpoolError::storage(format!("timestamp out of range: {ms}")))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, SpoolError> {
    ms.map(from_millis).transpose()
}

fn to_u32(value: i64, column: &str) -> Result<u32, SpoolError> {
    u32::try_from(value).map_err(|_| SpoolError::storage(format!("{column} out of range: {value}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn decode_job(row: &SqliteRow) -> Result<JobRecord, SpoolError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;
    let result: Option<String> = row.try_get("result")?;
    let locked_by: Option<String> = row.try_get("locked_by")?;
    let timeout_seconds: i64 = row.try_get("timeout_seconds")?;

    Ok(JobRecord {
        id: id.parse().map_err(|e| SpoolError::storage(format!("{e}")))?,
        idempotency_key: IdempotencyKey::from_stored(row.try_get::<String, _>("idempotency_key")?),
        submitter: row.try_get("submitter")?,
        payload: serde_json::from_str(&payload)?,
        status: status
            .parse()
            .map_err(|e| SpoolError::storage(format!("{e}")))?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        error_message: row.try_get("error_message")?,
        retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
        max_retries: to_u32(row.try_get("max_retries")?, "max_retries")?,
        next_retry_at: opt_from_millis(row.try_get("next_retry_at")?)?,
        timeout_seconds: u64::try_from(timeout_seconds).map_err(|_| {
            SpoolError::storage(format!("timeout_seconds out of range: {timeout_seconds}"))
        })?,
        locked_at: opt_from_millis(row.try_get("locked_at")?)?,
        locked_by: locked_by
            .map(|raw| raw.parse::<WorkerId>())
            .transpose()
            .map_err(|e| SpoolError::storage(format!("{e}")))?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        completed_at: opt_from_millis(row.try_get("completed_at")?)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_unless_active(&self, job: JobRecord) -> Result<InsertOutcome, SpoolError> {
        let sql = format!(
            "INSERT INTO jobs ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let inserted = sqlx::query(&sql)
            .bind(job.id.to_string())
            .bind(job.idempotency_key.as_str())
            .bind(job.submitter.as_deref())
            .bind(serde_json::to_string(&job.payload)?)
            .bind(job.status.as_str())
            .bind(job.result.as_ref().map(serde_json::to_string).transpose()?)
            .bind(job.error_message.as_deref())
            .bind(i64::from(job.retry_count))
            .bind(i64::from(job.max_retries))
            .bind(opt_millis(job.next_retry_at))
            .bind(job.timeout_seconds as i64)
            .bind(opt_millis(job.locked_at))
            .bind(job.locked_by.map(|w| w.to_string()))
            .bind(millis(job.created_at))
            .bind(millis(job.updated_at))
            .bind(opt_millis(job.completed_at))
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(job)),
            Err(err) if is_unique_violation(&err) => {
                match self.find_active_by_key(&job.idempotency_key).await? {
                    Some(existing) => Ok(InsertOutcome::Existing(existing)),
                    // The active row finished in between; the violation was on something else.
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_active_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE idempotency_key = ? AND status IN ('pending', 'processing') \
             LIMIT 1"
        );
        self.fetch_optional(&sql, key.as_str()).await
    }

    async fn find_latest_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE idempotency_key = ? \
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        );
        self.fetch_optional(&sql, key.as_str()).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpoolError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        self.fetch_optional(&sql, &id.to_string()).await
    }

    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpoolError> {
        // 選択と更新を 1 文で行い、更新側でも条件を再確認する
        // 同じキーで別の active 行がある failed 行は、その行が終わるまで待つ
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                locked_at = ?,
                locked_by = ?,
                updated_at = ?,
                error_message = NULL,
                next_retry_at = NULL
            WHERE id = (
                SELECT c.id FROM jobs AS c
                WHERE c.status IN ('pending', 'failed')
                  AND (c.next_retry_at IS NULL OR c.next_retry_at <= ?)
                  AND c.locked_at IS NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs AS o
                      WHERE o.idempotency_key = c.idempotency_key
                        AND o.status IN ('pending', 'processing')
                        AND o.id <> c.id
                  )
                ORDER BY c.created_at, c.seq
                LIMIT 1
            )
              AND status IN ('pending', 'failed')
              AND locked_at IS NULL
            RETURNING {COLUMNS}
            "#
        );
        let now_ms = millis(now);
        let row = sqlx::query(&sql)
            .bind(now_ms)
            .bind(worker.to_string())
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_job).transpose()
    }

    async fn find_stale(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, SpoolError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = 'processing' \
               AND locked_at IS NOT NULL \
               AND locked_at + timeout_seconds * 1000 < ? \
             ORDER BY locked_at, seq"
        );
        let rows = sqlx::query(&sql)
            .bind(millis(now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_job).collect()
    }

    async fn compare_and_set(
        &self,
        expect: &Expectation,
        next: &JobRecord,
    ) -> Result<bool, SpoolError> {
        let set = "UPDATE jobs SET status = ?, result = ?, error_message = ?, retry_count = ?, \
                   next_retry_at = ?, locked_at = ?, locked_by = ?, updated_at = ?, \
                   completed_at = ? WHERE id = ?";
        let sql = match expect {
            Expectation::Locked(_) => {
                format!("{set} AND status = 'processing' AND locked_by = ? AND locked_at = ?")
            }
            Expectation::Unchanged { .. } => format!("{set} AND status = ? AND updated_at = ?"),
        };

        let query = sqlx::query(&sql)
            .bind(next.status.as_str())
            .bind(next.result.as_ref().map(serde_json::to_string).transpose()?)
            .bind(next.error_message.as_deref())
            .bind(i64::from(next.retry_count))
            .bind(opt_millis(next.next_retry_at))
            .bind(opt_millis(next.locked_at))
            .bind(next.locked_by.map(|w| w.to_string()))
            .bind(millis(next.updated_at))
            .bind(opt_millis(next.completed_at))
            .bind(next.id.to_string());
        let query = match expect {
            Expectation::Locked(guard) => query
                .bind(guard.worker.to_string())
                .bind(millis(guard.locked_at)),
            Expectation::Unchanged { status, updated_at } => {
                query.bind(status.as_str()).bind(millis(*updated_at))
            }
        };

        match query.execute(&self.pool).await {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn counts(&self) -> Result<JobCounts, SpoolError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = JobStatus::from_str(&status).map_err(|e| SpoolError::storage(format!("{e}")))?;
            let n = usize::try_from(n)
                .map_err(|_| SpoolError::storage(format!("count out of range: {n}")))?;
            counts.add(status, n);
        }
        Ok(counts)
    }
}
