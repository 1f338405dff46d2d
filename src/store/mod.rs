#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

mod agent_ops;
mod api_key_ops;
mod audit_ops;
mod crew_ops;
mod evolution_ops;
mod instruction_ops;
mod mappers;
mod workflow_ops;

pub use audit_ops::{AuditPhase, AuditRecord};
pub use api_key_ops::ApiKeyRecord;

use crate::error::{CrewError, Result};
use crate::types::CrewId;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

const EMBEDDED_SCHEMA_SQL: &str = include_str!("../../schema.sql");
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const BUSY_TIMEOUT_MS: u64 = 5_000;
const CONNECT_ATTEMPTS: u32 = 3;

/// Durable state for agents, crews, workflows, instructions, evolution
/// events, audit records, and API keys.
///
/// Individual entity writes are single statements (atomic under SQLite);
/// the evolution path commits the agent update and event append in one
/// transaction. Instruction inserts ping an in-process watch signal keyed
/// by crew id so intake loops need not poll blindly.
pub struct Store {
    pool: SqlitePool,
    watchers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            watchers: Arc::clone(&self.watchers),
        }
    }
}

impl Store {
    /// Opens the store, creating the database file and schema on first use.
    ///
    /// # Errors
    /// Returns `CrewError::Unavailable` when the backend cannot be reached
    /// within the connect budget.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_timeout(database_url, None).await
    }

    /// # Errors
    /// Returns `CrewError::Unavailable` when the backend cannot be reached.
    pub async fn connect_with_timeout(
        database_url: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Self> {
        let connect_timeout =
            Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS));
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CrewError::Config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // In-memory SQLite gives each connection its own database, so the
        // pool must stay at a single connection there.
        let max_connections = if in_memory { 1 } else { 8 };

        let mut attempt = 0_u32;
        let mut delay = Duration::from_millis(100);
        let pool = loop {
            attempt += 1;
            let result = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(connect_timeout)
                .connect_with(options.clone())
                .await;
            match result {
                Ok(pool) => break pool,
                Err(err) if attempt < CONNECT_ATTEMPTS => {
                    warn!(attempt, error = %err, "store connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    return Err(CrewError::Unavailable(format!(
                        "store unreachable after {attempt} attempts: {err}"
                    )))
                }
            }
        };

        let store = Self {
            pool,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        };
        store.init_schema().await?;
        info!(url = database_url, "store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(EMBEDDED_SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| CrewError::Store(format!("Failed to apply schema: {e}")))?;
        Ok(())
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Liveness probe used by the health loop and the `doctor` command.
    ///
    /// # Errors
    /// Returns `CrewError::Unavailable` when the backend does not answer.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| CrewError::Unavailable(format!("store ping failed: {e}")))
    }

    /// Watch handle pinged whenever an instruction lands for `crew_id`.
    ///
    /// The handle is shared: callers hold the `Arc` and `notified().await`
    /// on it instead of polling the instructions table blindly.
    #[must_use]
    pub fn instruction_watch(&self, crew_id: &CrewId) -> Arc<Notify> {
        let mut watchers = match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            watchers
                .entry(crew_id.value().to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    pub(crate) fn signal_instruction(&self, crew_id: &CrewId) {
        let watchers = match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(notify) = watchers.get(crew_id.value()) {
            notify.notify_waiters();
        }
    }

    pub(crate) fn drop_watch(&self, crew_id: &CrewId) {
        let mut watchers = match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers.remove(crew_id.value());
    }

    pub(crate) fn store_err(context: &str, err: &sqlx::Error) -> CrewError {
        match err {
            sqlx::Error::PoolTimedOut => {
                CrewError::Unavailable(format!("{context}: store busy"))
            }
            sqlx::Error::Database(db) if db.message().contains("locked") => {
                CrewError::Unavailable(format!("{context}: store locked"))
            }
            other => CrewError::Store(format!("{context}: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::Store;
    use crate::types::CrewId;

    async fn memory_store() -> Store {
        match Store::connect("sqlite::memory:").await {
            Ok(store) => store,
            Err(err) => panic!("in-memory store must open: {err}"),
        }
    }

    #[tokio::test]
    async fn schema_applies_and_ping_succeeds() {
        let store = memory_store().await;
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn instruction_watch_is_shared_per_crew() {
        let store = memory_store().await;
        let crew = CrewId::new("crew-w");
        let a = store.instruction_watch(&crew);
        let b = store.instruction_watch(&crew);
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn signal_wakes_watcher() {
        let store = memory_store().await;
        let crew = CrewId::new("crew-s");
        let watch = store.instruction_watch(&crew);
        let waiter = tokio::spawn(async move { watch.notified().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.signal_instruction(&crew);
        assert!(tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .is_ok());
    }
}
