#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod paths;
pub mod rate_limit;
pub mod validation;

pub use validation::{ArgSchema, FieldKind, FieldSpec};

use crate::config::ServerConfig;
use crate::error::{CrewError, Result};
use crate::store::{AuditPhase, AuditRecord, Store};
use chrono::Duration;
use rate_limit::{RateLimiter, RateLimits};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Identity attached to an admitted request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client_id: String,
    pub permissions: Vec<String>,
}

/// The request admission pipeline, applied to every tool call in order:
/// authenticate, authorize, rate-limit, validate, sanitize, audit.
pub struct SecurityGate {
    store: Store,
    limiter: RateLimiter,
    config: Arc<RwLock<Arc<ServerConfig>>>,
}

impl SecurityGate {
    #[must_use]
    pub fn new(store: Store, config: Arc<RwLock<Arc<ServerConfig>>>) -> Self {
        Self {
            store,
            limiter: RateLimiter::new(),
            config,
        }
    }

    fn current_config(&self) -> Arc<ServerConfig> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Runs the gate for one call. On success the argument map has been
    /// validated and sanitized in place and a request-start audit record
    /// is written.
    ///
    /// # Errors
    /// One of `Unauthenticated`, `Forbidden`, `RateLimited`, or
    /// `InvalidArgument`, in pipeline order.
    pub async fn admit(
        &self,
        credential: Option<&str>,
        tool: &str,
        schema: &ArgSchema,
        args: &mut Map<String, Value>,
    ) -> Result<AuthContext> {
        let key = auth::authenticate(&self.store, credential).await?;

        if !auth::any_permission_matches(&key.permissions, tool) {
            self.audit_security(&key.key_id, tool, "forbidden").await;
            return Err(CrewError::Forbidden(format!(
                "key '{}' may not call {tool}",
                key.key_id
            )));
        }

        let config = self.current_config();
        let limits = RateLimits {
            per_hour: key.quota_per_hour.unwrap_or(config.rate_limit_per_hour),
            per_minute: key
                .quota_per_minute
                .unwrap_or(config.burst_limit_per_minute),
            block: Duration::seconds(i64::try_from(config.rate_limit_block_secs).unwrap_or(3_600)),
        };
        if let Err(err) = self.limiter.admit(&key.key_id, limits) {
            self.audit_security(&key.key_id, tool, "rate_limited").await;
            return Err(err);
        }

        schema.validate(args)?;

        let context = AuthContext {
            client_id: key.key_id,
            permissions: key.permissions,
        };
        let record = AuditRecord::start(&context.client_id, tool, hash_args(args));
        self.store.append_audit(&record).await?;
        debug!(client = %context.client_id, tool, "request admitted");
        Ok(context)
    }

    /// Completion-side audit record; called by the dispatcher after the
    /// handler resolves.
    pub async fn audit_completion(
        &self,
        context: &AuthContext,
        tool: &str,
        args: &Map<String, Value>,
        outcome: &str,
        latency_ms: i64,
    ) {
        let record = AuditRecord::complete(
            &context.client_id,
            tool,
            hash_args(args),
            outcome,
            latency_ms,
        );
        if let Err(err) = self.store.append_audit(&record).await {
            tracing::warn!(error = %err, "failed to append completion audit record");
        }
    }

    async fn audit_security(&self, client_id: &str, tool: &str, outcome: &str) {
        let record = AuditRecord {
            ts: chrono::Utc::now(),
            client_id: client_id.to_string(),
            tool: tool.to_string(),
            phase: AuditPhase::Security,
            arg_hash: String::new(),
            outcome: outcome.to_string(),
            latency_ms: None,
        };
        if let Err(err) = self.store.append_audit(&record).await {
            tracing::warn!(error = %err, "failed to append security audit record");
        }
    }
}

/// SHA-256 over the canonical JSON rendering of the argument map. The
/// audit log stores only this hash, never raw arguments.
#[must_use]
pub fn hash_args(args: &Map<String, Value>) -> String {
    let canonical = Value::Object(args.clone()).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{hash_args, ArgSchema, SecurityGate};
    use crate::config::ServerConfig;
    use crate::error::CrewError;
    use crate::security::auth;
    use crate::security::validation::FieldSpec;
    use crate::store::Store;
    use serde_json::{json, Map, Value};
    use std::path::PathBuf;
    use std::sync::{Arc, RwLock};

    const SCHEMA: ArgSchema = ArgSchema {
        fields: &[FieldSpec::optional_text("crew_id")],
    };

    async fn gate_with_key(permissions: &[&str]) -> (SecurityGate, String) {
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("in-memory store");
        let raw = auth::mint_key(
            &store,
            "test-client",
            permissions.iter().map(ToString::to_string).collect(),
            None,
        )
        .await
        .expect("mint");
        let config = Arc::new(RwLock::new(Arc::new(ServerConfig::for_tests(
            PathBuf::from("/tmp/crewd-test"),
        ))));
        (SecurityGate::new(store, config), raw)
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn missing_credential_is_unauthenticated() {
        let (gate, _raw) = gate_with_key(&["*"]).await;
        let mut map = Map::new();
        let err = gate.admit(None, "health_check", &SCHEMA, &mut map).await;
        assert!(matches!(err, Err(CrewError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn permission_glob_gates_tools() {
        let (gate, raw) = gate_with_key(&["get_*"]).await;
        let mut map = Map::new();
        assert!(gate
            .admit(Some(&raw), "get_crew_status", &SCHEMA, &mut map)
            .await
            .is_ok());
        let err = gate
            .admit(Some(&raw), "create_evolving_crew", &SCHEMA, &mut map)
            .await;
        assert!(matches!(err, Err(CrewError::Forbidden(_))));
    }

    #[tokio::test]
    async fn burst_limit_rejects_eleventh_call() {
        let (gate, raw) = gate_with_key(&["*"]).await;
        for _ in 0..10 {
            let mut map = Map::new();
            gate.admit(Some(&raw), "health_check", &SCHEMA, &mut map)
                .await
                .expect("admitted");
        }
        let mut map = Map::new();
        let err = gate.admit(Some(&raw), "health_check", &SCHEMA, &mut map).await;
        assert!(matches!(err, Err(CrewError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn validation_failures_surface_as_invalid_argument() {
        let (gate, raw) = gate_with_key(&["*"]).await;
        let mut map = args(json!({"unknown_field": 1}));
        let err = gate.admit(Some(&raw), "health_check", &SCHEMA, &mut map).await;
        assert!(matches!(err, Err(CrewError::InvalidArgument(_))));
    }

    #[test]
    fn arg_hash_is_deterministic() {
        let a = args(json!({"crew_id": "c1"}));
        let b = args(json!({"crew_id": "c1"}));
        assert_eq!(hash_args(&a), hash_args(&b));
        let c = args(json!({"crew_id": "c2"}));
        assert_ne!(hash_args(&a), hash_args(&c));
    }
}
