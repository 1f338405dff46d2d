use crate::error::{CrewError, Result};
use crate::store::{ApiKeyRecord, Store};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

const KEY_MATERIAL_LEN: usize = 43;

#[must_use]
pub fn hash_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[must_use]
pub fn generate_key_material() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_MATERIAL_LEN)
        .map(char::from)
        .collect();
    format!("crewd_{suffix}")
}

/// Glob match for permission patterns: `*` matches any run of characters,
/// all other characters match literally. `get_*` covers `get_crew_status`,
/// `*` covers everything.
#[must_use]
pub fn permission_matches(pattern: &str, tool: &str) -> bool {
    fn matches(pattern: &[u8], tool: &[u8]) -> bool {
        match (pattern.first(), tool.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&pattern[1..], tool)
                    || (!tool.is_empty() && matches(pattern, &tool[1..]))
            }
            (Some(p), Some(t)) if p == t => matches(&pattern[1..], &tool[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), tool.as_bytes())
}

#[must_use]
pub fn any_permission_matches(permissions: &[String], tool: &str) -> bool {
    permissions
        .iter()
        .any(|pattern| permission_matches(pattern, tool))
}

/// Mints a named key, stores only its hash, and returns the plaintext to
/// the caller exactly once.
///
/// # Errors
/// Returns an error if the store operation fails.
pub async fn mint_key(
    store: &Store,
    key_id: &str,
    permissions: Vec<String>,
    material: Option<String>,
) -> Result<String> {
    let raw = material.unwrap_or_else(generate_key_material);
    if raw.len() < 16 {
        return Err(CrewError::InvalidArgument(
            "key material must be at least 16 characters".to_string(),
        ));
    }
    let record = ApiKeyRecord::new(key_id, hash_key(&raw), permissions);
    store.put_api_key(&record).await?;
    Ok(raw)
}

/// First-boot bootstrap: when no key exists, mints the admin key and
/// prints it to the operator exactly once. The plaintext is never logged
/// through tracing and never stored.
///
/// # Errors
/// Returns an error if the store operation fails.
pub async fn bootstrap_admin_key(store: &Store, fixed_material: Option<String>) -> Result<()> {
    if store.count_api_keys().await? > 0 {
        return Ok(());
    }
    let raw = mint_key(store, "admin", vec!["*".to_string()], fixed_material).await?;
    // Operator-facing one-time print; deliberately not a tracing event so
    // log pipelines never capture the plaintext.
    eprintln!("crewd: minted admin API key (shown once): {raw}");
    info!("admin api key minted at bootstrap");
    Ok(())
}

/// Resolves a presented credential to its key record.
///
/// # Errors
/// Returns `CrewError::Unauthenticated` for missing, unknown, or disabled
/// credentials.
pub async fn authenticate(store: &Store, credential: Option<&str>) -> Result<ApiKeyRecord> {
    let raw = credential
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CrewError::Unauthenticated("missing API key".to_string()))?;
    let hash = hash_key(raw);
    let record = store
        .get_api_key_by_hash(&hash)
        .await?
        .ok_or_else(|| CrewError::Unauthenticated("unknown API key".to_string()))?;
    if record.disabled {
        warn!(client = %record.key_id, "disabled key presented");
        return Err(CrewError::Unauthenticated("API key disabled".to_string()));
    }
    store.touch_api_key(&hash).await?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{any_permission_matches, hash_key, permission_matches};

    #[test]
    fn hash_is_stable_and_hex() {
        let h = hash_key("crewd_test");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_key("crewd_test"));
        assert_ne!(h, hash_key("crewd_test2"));
    }

    #[test]
    fn glob_matching_covers_prefix_and_wildcard() {
        assert!(permission_matches("*", "create_evolving_crew"));
        assert!(permission_matches("get_*", "get_crew_status"));
        assert!(!permission_matches("get_*", "create_evolving_crew"));
        assert!(permission_matches("health_check", "health_check"));
        assert!(permission_matches("*_crew", "run_autonomous_crew"));
        assert!(!permission_matches("", "x"));
    }

    #[test]
    fn permission_set_matches_any() {
        let perms = vec!["get_*".to_string(), "health_check".to_string()];
        assert!(any_permission_matches(&perms, "get_agent_details"));
        assert!(any_permission_matches(&perms, "health_check"));
        assert!(!any_permission_matches(&perms, "run_autonomous_crew"));
    }
}
