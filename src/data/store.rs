//! SQLite persistence for analysis jobs, their trade plans and the
//! identity provider's session table.
//!
//! A job and its plan are only ever written together inside one
//! transaction, and neither is updated afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AnalysisJob, AuthenticatedCaller, Direction, HistoryEntry, JobStatus, Reasoning, TradePlan,
};

/// Durable record of analysis jobs and plans.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Writes the job and its plan atomically: both rows or neither.
    async fn record_analysis(&self, job: &AnalysisJob, plan: &TradePlan) -> Result<(), StoreError>;

    /// A user's jobs with their plans, newest first.
    async fn recent_analyses(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Maps a session token to the user it was issued for.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_session(&self, token: &str) -> Result<Option<AuthenticatedCaller>, StoreError>;
}

/// One connection shared behind a lock. Queries issued through the
/// async traits run on the blocking pool so commits never stall a
/// runtime worker.
pub struct SqliteStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        info!("💾 [STORE] SQLite store initialized");
        Ok(store)
    }

    /// In-memory store, used by tests and demo runs.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        debug!("💾 [STORE] In-memory SQLite store initialized");
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        lock_conn(&self.conn)
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_conn(&conn)?;
            f(&mut guard)
        })
        .await?
    }

    pub(crate) fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                image_ref TEXT NOT NULL,
                params TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'done', 'failed')),
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_jobs_user_created
                ON analysis_jobs(user_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS trade_plans (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL UNIQUE REFERENCES analysis_jobs(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                direction TEXT NOT NULL CHECK (direction IN ('long', 'short')),
                entry_low REAL NOT NULL,
                entry_high REAL NOT NULL,
                stop REAL NOT NULL,
                take_profits TEXT NOT NULL,
                rr REAL NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                timeframe TEXT NOT NULL
            );",
        )?;

        debug!("💾 [STORE] Schema ready");
        Ok(())
    }

    // ========== Users & Sessions ==========

    /// Inserts a user if absent. Normally done by the identity provider.
    pub fn upsert_user(&self, user_id: &str, email: Option<&str>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET email = COALESCE(excluded.email, users.email)",
            params![user_id, email, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Issues a session token for `user_id` valid for `ttl`.
    pub fn create_session(&self, user_id: &str, ttl: chrono::Duration) -> Result<String, StoreError> {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = (Utc::now() + ttl).timestamp_millis();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (session_token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![token, user_id, expires_at],
        )?;
        Ok(token)
    }

    /// Removes a user; their sessions, jobs and plans cascade with them.
    pub fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(())
    }

    // ========== Counts ==========

    pub fn job_count(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_jobs WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn plan_count(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trade_plans WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

fn insert_analysis(conn: &mut Connection, job: &AnalysisJob, plan: &TradePlan) -> Result<(), StoreError> {
    if plan.job_id != job.id || plan.user_id != job.user_id {
        return Err(StoreError::Integrity(format!(
            "plan {} does not belong to job {} of user {}",
            plan.id, job.id, job.user_id
        )));
    }
    if job.status != JobStatus::Done {
        return Err(StoreError::Integrity(format!(
            "job {} carries a plan but has status '{}'",
            job.id,
            job.status.as_str()
        )));
    }

    let params_json = serde_json::to_string(&job.params)?;
    let take_profits = serde_json::to_string(&plan.take_profits)?;
    let reasoning = serde_json::to_string(&plan.reasoning)?;

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO analysis_jobs (id, user_id, image_ref, params, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            job.id,
            job.user_id,
            job.image_ref,
            params_json,
            job.status.as_str(),
            job.created_at.timestamp_millis(),
        ],
    )?;

    tx.execute(
        "INSERT INTO trade_plans (id, job_id, user_id, direction, entry_low, entry_high,
                                  stop, take_profits, rr, confidence, reasoning, timeframe)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            plan.id,
            plan.job_id,
            plan.user_id,
            plan.direction.as_str(),
            plan.entry_low,
            plan.entry_high,
            plan.stop,
            take_profits,
            plan.rr,
            plan.confidence,
            reasoning,
            plan.timeframe,
        ],
    )?;

    tx.commit()?;
    Ok(())
}

fn select_history(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT j.id, j.user_id, j.image_ref, j.params, j.status, j.created_at,
                p.id, p.direction, p.entry_low, p.entry_high, p.stop, p.take_profits,
                p.rr, p.confidence, p.reasoning, p.timeframe
         FROM analysis_jobs j
         LEFT JOIN trade_plans p ON p.job_id = j.id
         WHERE j.user_id = ?1
         ORDER BY j.created_at DESC, j.rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit as i64], history_row)?;
    let entries = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn select_session(conn: &Connection, token: &str) -> Result<Option<AuthenticatedCaller>, StoreError> {
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE session_token = ?1 AND expires_at > ?2",
            params![token, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id.map(AuthenticatedCaller::new))
}

#[async_trait]
impl AnalysisRepository for SqliteStore {
    async fn record_analysis(&self, job: &AnalysisJob, plan: &TradePlan) -> Result<(), StoreError> {
        let (owned_job, owned_plan) = (job.clone(), plan.clone());
        self.with_conn(move |conn| insert_analysis(conn, &owned_job, &owned_plan)).await?;
        debug!("💾 [STORE] Recorded job {} with plan {}", job.id, plan.id);
        Ok(())
    }

    async fn recent_analyses(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| select_history(conn, &user_id, limit)).await
    }
}

#[async_trait]
impl SessionResolver for SqliteStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<AuthenticatedCaller>, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| select_session(conn, &token)).await
    }
}

fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let job_id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;

    let job = AnalysisJob {
        id: job_id.clone(),
        user_id: row.get(1)?,
        image_ref: row.get(2)?,
        params: json_column(row, 3)?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown job status '{}'", status)))?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or_else(|| conversion_error(5, format!("timestamp {} out of range", created_at)))?,
    };

    let plan_id: Option<String> = row.get(6)?;
    let plan = match plan_id {
        Some(id) => {
            let direction: String = row.get(7)?;
            Some(TradePlan {
                id,
                job_id,
                user_id: job.user_id.clone(),
                direction: Direction::parse(&direction)
                    .ok_or_else(|| conversion_error(7, format!("unknown direction '{}'", direction)))?,
                entry_low: row.get(8)?,
                entry_high: row.get(9)?,
                stop: row.get(10)?,
                take_profits: json_column(row, 11)?,
                rr: row.get(12)?,
                confidence: row.get(13)?,
                reasoning: json_column::<Reasoning>(row, 14)?,
                timeframe: row.get(15)?,
            })
        }
        None => None,
    };

    Ok(HistoryEntry { job, plan })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
