use super::mappers::{encode_datetime, get_datetime, get_opt_i64, get_text};
use super::Store;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    RequestStart,
    RequestComplete,
    WorkflowSealed,
    Security,
}

impl AuditPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestStart => "request_start",
            Self::RequestComplete => "request_complete",
            Self::WorkflowSealed => "workflow_sealed",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only audit entry. Argument payloads are stored only as a
/// SHA-256 hash; credentials never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub client_id: String,
    pub tool: String,
    pub phase: AuditPhase,
    pub arg_hash: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

impl AuditRecord {
    #[must_use]
    pub fn start(client_id: &str, tool: &str, arg_hash: String) -> Self {
        Self {
            ts: Utc::now(),
            client_id: client_id.to_string(),
            tool: tool.to_string(),
            phase: AuditPhase::RequestStart,
            arg_hash,
            outcome: "accepted".to_string(),
            latency_ms: None,
        }
    }

    #[must_use]
    pub fn complete(
        client_id: &str,
        tool: &str,
        arg_hash: String,
        outcome: &str,
        latency_ms: i64,
    ) -> Self {
        Self {
            ts: Utc::now(),
            client_id: client_id.to_string(),
            tool: tool.to_string(),
            phase: AuditPhase::RequestComplete,
            arg_hash,
            outcome: outcome.to_string(),
            latency_ms: Some(latency_ms),
        }
    }
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditRecord> {
    let phase_raw = get_text(row, "phase")?;
    let phase = match phase_raw.as_str() {
        "request_start" => AuditPhase::RequestStart,
        "workflow_sealed" => AuditPhase::WorkflowSealed,
        "security" => AuditPhase::Security,
        _ => AuditPhase::RequestComplete,
    };
    Ok(AuditRecord {
        ts: get_datetime(row, "ts")?,
        client_id: get_text(row, "client_id")?,
        tool: get_text(row, "tool")?,
        phase,
        arg_hash: get_text(row, "arg_hash")?,
        outcome: get_text(row, "outcome")?,
        latency_ms: get_opt_i64(row, "latency_ms")?,
    })
}

impl Store {
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (ts, client_id, tool, phase, arg_hash, outcome, latency_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(encode_datetime(record.ts))
        .bind(&record.client_id)
        .bind(&record.tool)
        .bind(record.phase.as_str())
        .bind(&record.arg_hash)
        .bind(&record.outcome)
        .bind(record.latency_ms)
        .execute(self.pool())
        .await
        .map(|_| ())
        .map_err(|e| Self::store_err("Failed to append audit record", &e))
    }

    /// Most recent audit entries, newest first; feeds `get_live_events`.
    ///
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn recent_audit(&self, limit: u32) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY audit_id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to read audit log", &e))?;
        rows.iter().map(audit_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::super::Store;
    use super::AuditRecord;

    #[tokio::test]
    async fn audit_appends_and_reads_back_in_reverse_order() {
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store");
        store
            .append_audit(&AuditRecord::start("client-1", "health_check", "h1".into()))
            .await
            .expect("append");
        store
            .append_audit(&AuditRecord::complete(
                "client-1",
                "health_check",
                "h1".into(),
                "ok",
                12,
            ))
            .await
            .expect("append");

        let records = store.recent_audit(10).await.expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, "ok");
        assert_eq!(records[0].latency_ms, Some(12));
    }
}
