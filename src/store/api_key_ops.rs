use super::mappers::{
    decode_json, encode_datetime, get_bool, get_datetime, get_opt_datetime, get_opt_i64, get_text,
};
use super::Store;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

/// Stored API key metadata. Only the SHA-256 hash of the key material is
/// persisted; plaintext exists nowhere past the mint step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub key_hash: String,
    /// Tool-name glob patterns this key may call.
    pub permissions: Vec<String>,
    pub quota_per_hour: Option<u32>,
    pub quota_per_minute: Option<u32>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    #[must_use]
    pub fn new(key_id: &str, key_hash: String, permissions: Vec<String>) -> Self {
        Self {
            key_id: key_id.to_string(),
            key_hash,
            permissions,
            quota_per_hour: None,
            quota_per_minute: None,
            disabled: false,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

fn api_key_from_row(row: &SqliteRow) -> Result<ApiKeyRecord> {
    Ok(ApiKeyRecord {
        key_id: get_text(row, "key_id")?,
        key_hash: get_text(row, "key_hash")?,
        permissions: decode_json("permissions", &get_text(row, "permissions")?)?,
        quota_per_hour: get_opt_i64(row, "quota_per_hour")?.and_then(|v| u32::try_from(v).ok()),
        quota_per_minute: get_opt_i64(row, "quota_per_minute")?.and_then(|v| u32::try_from(v).ok()),
        disabled: get_bool(row, "disabled")?,
        created_at: get_datetime(row, "created_at")?,
        last_used_at: get_opt_datetime(row, "last_used_at")?,
    })
}

impl Store {
    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn put_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let permissions = serde_json::to_string(&record.permissions)?;
        sqlx::query(
            "INSERT INTO api_keys
                 (key_id, key_hash, permissions, quota_per_hour, quota_per_minute,
                  disabled, created_at, last_used_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (key_id) DO UPDATE SET
                 key_hash = excluded.key_hash,
                 permissions = excluded.permissions,
                 quota_per_hour = excluded.quota_per_hour,
                 quota_per_minute = excluded.quota_per_minute,
                 disabled = excluded.disabled,
                 last_used_at = excluded.last_used_at",
        )
        .bind(&record.key_id)
        .bind(&record.key_hash)
        .bind(permissions)
        .bind(record.quota_per_hour.map(i64::from))
        .bind(record.quota_per_minute.map(i64::from))
        .bind(i64::from(record.disabled))
        .bind(encode_datetime(record.created_at))
        .bind(record.last_used_at.map(encode_datetime))
        .execute(self.pool())
        .await
        .map(|_| ())
        .map_err(|e| Self::store_err("Failed to put api key", &e))
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to look up api key", &e))?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn touch_api_key(&self, key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE key_hash = ?")
            .bind(encode_datetime(Utc::now()))
            .bind(key_hash)
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(|e| Self::store_err("Failed to touch api key", &e))
    }

    /// # Errors
    /// Returns an error if the store operation fails.
    pub async fn count_api_keys(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM api_keys")
            .fetch_one(self.pool())
            .await
            .map_err(|e| Self::store_err("Failed to count api keys", &e))
    }
}
