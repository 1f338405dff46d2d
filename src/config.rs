use crate::error::{CrewError, Result};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TryFrom<&str> for TransportKind {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            _ => Err(format!("Unknown transport kind: {value}")),
        }
    }
}

/// Policy applied when `run_autonomous_crew` arrives with the worker pool
/// saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Wait for a slot up to the tool deadline.
    Queue,
    /// Fail fast with `Unavailable`.
    Reject,
}

/// Process configuration, sourced from the environment once at boot.
///
/// Every field has a contractual `CREWD_*` variable; see `from_env`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub data_root: PathBuf,
    pub database_url: String,
    pub worker_pool_size: usize,
    pub max_concurrent_workflows: usize,
    pub saturation_policy: SaturationPolicy,
    pub tool_deadline_secs: u64,
    pub rate_limit_per_hour: u32,
    pub burst_limit_per_minute: u32,
    pub rate_limit_block_secs: u64,
    pub evolution_sweep_secs: u64,
    pub min_evolution_interval_secs: u64,
    pub instruction_ttl_secs: u64,
    pub instruction_poll_secs: u64,
    pub instruction_expirer_secs: u64,
    pub workflow_reaper_secs: u64,
    pub health_probe_secs: u64,
    pub max_workflow_secs: u64,
    pub emergency_stop_deadline_secs: u64,
    pub deterministic_ids: bool,
    pub simulated_runner: bool,
    /// Stdio-transport client credential, conveyed out-of-band at boot.
    #[serde(skip_serializing)]
    pub stdio_api_key: Option<String>,
    /// Fixed admin key material for bootstrap; minted randomly if unset.
    #[serde(skip_serializing)]
    pub bootstrap_admin_key: Option<String>,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| CrewError::Config(format!("{name} has invalid value: {raw}"))),
    }
}

fn env_bool(name: &str) -> Result<bool> {
    match env_string(name).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(CrewError::Config(format!(
            "{name} must be a boolean, got: {other}"
        ))),
    }
}

impl ServerConfig {
    /// Loads configuration from the environment and validates it.
    ///
    /// # Errors
    /// Returns `CrewError::Config` on unparsable or out-of-range values.
    pub fn from_env() -> Result<Self> {
        let data_root = env_string("CREWD_DATA_ROOT")
            .map_or_else(|| PathBuf::from("./crewd-data"), PathBuf::from);
        let database_url = env_string("CREWD_DATABASE_URL").unwrap_or_else(|| {
            format!("sqlite://{}/crewd.db", data_root.display())
        });
        let cores = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        let worker_pool_size = env_parse::<usize>("CREWD_WORKER_POOL_SIZE")?.unwrap_or(cores);

        let transport = match env_string("CREWD_TRANSPORT") {
            None => TransportKind::Stdio,
            Some(raw) => TransportKind::try_from(raw.as_str()).map_err(CrewError::Config)?,
        };
        let saturation_policy = match env_string("CREWD_SATURATION_POLICY").as_deref() {
            None | Some("queue") => SaturationPolicy::Queue,
            Some("reject") => SaturationPolicy::Reject,
            Some(other) => {
                return Err(CrewError::Config(format!(
                    "CREWD_SATURATION_POLICY must be queue or reject, got: {other}"
                )))
            }
        };

        let config = Self {
            host: env_string("CREWD_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_parse::<u16>("CREWD_PORT")?.unwrap_or(8765),
            transport,
            data_root,
            database_url,
            worker_pool_size,
            max_concurrent_workflows: env_parse::<usize>("CREWD_MAX_CONCURRENT_WORKFLOWS")?
                .unwrap_or(worker_pool_size),
            saturation_policy,
            tool_deadline_secs: env_parse("CREWD_TOOL_DEADLINE_SECS")?.unwrap_or(30),
            rate_limit_per_hour: env_parse("CREWD_RATE_LIMIT_PER_HOUR")?.unwrap_or(100),
            burst_limit_per_minute: env_parse("CREWD_BURST_LIMIT_PER_MINUTE")?.unwrap_or(10),
            rate_limit_block_secs: env_parse("CREWD_RATE_LIMIT_BLOCK_SECS")?.unwrap_or(3_600),
            evolution_sweep_secs: env_parse("CREWD_EVOLUTION_SWEEP_SECS")?.unwrap_or(3_600),
            min_evolution_interval_secs: env_parse("CREWD_MIN_EVOLUTION_INTERVAL_SECS")?
                .unwrap_or(6 * 3_600),
            instruction_ttl_secs: env_parse("CREWD_INSTRUCTION_TTL_SECS")?.unwrap_or(3_600),
            instruction_poll_secs: env_parse("CREWD_INSTRUCTION_POLL_SECS")?.unwrap_or(2),
            instruction_expirer_secs: env_parse("CREWD_INSTRUCTION_EXPIRER_SECS")?.unwrap_or(60),
            workflow_reaper_secs: env_parse("CREWD_WORKFLOW_REAPER_SECS")?.unwrap_or(30),
            health_probe_secs: env_parse("CREWD_HEALTH_PROBE_SECS")?.unwrap_or(30),
            max_workflow_secs: env_parse("CREWD_MAX_WORKFLOW_SECS")?.unwrap_or(3_600),
            emergency_stop_deadline_secs: env_parse("CREWD_EMERGENCY_STOP_DEADLINE_SECS")?
                .unwrap_or(10),
            deterministic_ids: env_bool("CREWD_DETERMINISTIC_IDS")?,
            simulated_runner: env_bool("CREWD_SIMULATED_RUNNER")?,
            stdio_api_key: env_string("CREWD_API_KEY"),
            bootstrap_admin_key: env_string("CREWD_BOOTSTRAP_ADMIN_KEY"),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `CrewError::Config` if any bound is violated.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(CrewError::Config(
                "CREWD_WORKER_POOL_SIZE must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_workflows == 0 {
            return Err(CrewError::Config(
                "CREWD_MAX_CONCURRENT_WORKFLOWS must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_workflows > self.worker_pool_size {
            return Err(CrewError::Config(
                "CREWD_MAX_CONCURRENT_WORKFLOWS cannot exceed the worker pool size".to_string(),
            ));
        }
        if self.instruction_poll_secs == 0 {
            return Err(CrewError::Config(
                "CREWD_INSTRUCTION_POLL_SECS must be at least 1".to_string(),
            ));
        }
        if self.tool_deadline_secs == 0 {
            return Err(CrewError::Config(
                "CREWD_TOOL_DEADLINE_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn tool_deadline(&self) -> Duration {
        Duration::from_secs(self.tool_deadline_secs)
    }

    #[must_use]
    pub const fn instruction_poll(&self) -> Duration {
        Duration::from_secs(self.instruction_poll_secs)
    }

    #[must_use]
    pub const fn emergency_stop_deadline(&self) -> Duration {
        Duration::from_secs(self.emergency_stop_deadline_secs)
    }

    #[must_use]
    pub fn deliverables_root(&self) -> PathBuf {
        self.data_root.join("deliverables")
    }

    /// Re-reads the reloadable subset (intervals, limits, deadlines) from
    /// the environment. Transport, data root, and credentials are fixed for
    /// the process lifetime.
    ///
    /// # Errors
    /// Returns `CrewError::Config` if the environment holds invalid values.
    pub fn reloaded(&self) -> Result<Self> {
        let mut next = Self::from_env()?;
        next.host = self.host.clone();
        next.port = self.port;
        next.transport = self.transport;
        next.data_root = self.data_root.clone();
        next.database_url = self.database_url.clone();
        next.worker_pool_size = self.worker_pool_size;
        // The worker pool is sized once at boot; its cap is not reloadable.
        next.max_concurrent_workflows = self.max_concurrent_workflows;
        next.saturation_policy = self.saturation_policy;
        next.deterministic_ids = self.deterministic_ids;
        next.simulated_runner = self.simulated_runner;
        next.stdio_api_key = self.stdio_api_key.clone();
        next.bootstrap_admin_key = self.bootstrap_admin_key.clone();
        next.validate()?;
        Ok(next)
    }

    /// Snapshot safe to return to clients: no credentials, no filesystem
    /// paths beyond the data root marker.
    #[must_use]
    pub fn sanitized_snapshot(&self) -> serde_json::Value {
        json!({
            "transport": match self.transport {
                TransportKind::Stdio => "stdio",
                TransportKind::Http => "http",
            },
            "host": self.host,
            "port": self.port,
            "worker_pool_size": self.worker_pool_size,
            "max_concurrent_workflows": self.max_concurrent_workflows,
            "tool_deadline_secs": self.tool_deadline_secs,
            "rate_limit_per_hour": self.rate_limit_per_hour,
            "burst_limit_per_minute": self.burst_limit_per_minute,
            "evolution_sweep_secs": self.evolution_sweep_secs,
            "min_evolution_interval_secs": self.min_evolution_interval_secs,
            "instruction_ttl_secs": self.instruction_ttl_secs,
            "instruction_poll_secs": self.instruction_poll_secs,
            "max_workflow_secs": self.max_workflow_secs,
            "emergency_stop_deadline_secs": self.emergency_stop_deadline_secs,
            "simulated_runner": self.simulated_runner,
        })
    }

    /// A configuration suitable for tests: in-memory store, tight timings.
    #[must_use]
    pub fn for_tests(data_root: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            transport: TransportKind::Stdio,
            data_root,
            database_url: "sqlite::memory:".to_string(),
            worker_pool_size: 2,
            max_concurrent_workflows: 2,
            saturation_policy: SaturationPolicy::Queue,
            tool_deadline_secs: 5,
            rate_limit_per_hour: 100,
            burst_limit_per_minute: 10,
            rate_limit_block_secs: 3_600,
            evolution_sweep_secs: 3_600,
            min_evolution_interval_secs: 6 * 3_600,
            instruction_ttl_secs: 3_600,
            instruction_poll_secs: 1,
            instruction_expirer_secs: 60,
            workflow_reaper_secs: 30,
            health_probe_secs: 30,
            max_workflow_secs: 3_600,
            emergency_stop_deadline_secs: 2,
            deterministic_ids: true,
            simulated_runner: true,
            stdio_api_key: None,
            bootstrap_admin_key: None,
        }
    }
}
