use crate::bus::InstructionBus;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::evolution::EvolutionEngine;
use crate::manager::CrewManager;
use crate::metrics::Metrics;
use crate::runner::{CrewRunner, SimulatedRunner, UnconfiguredRunner};
use crate::security::{auth, SecurityGate};
use crate::store::Store;
use crate::types::{HealthSummary, IdMinter};
use crate::workflow_engine::WorkflowEngine;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::info;

/// Everything one process instance owns, wired once in `main` and handed
/// to the transports. No global singletons: each component receives its
/// dependencies by constructor.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<RwLock<Arc<ServerConfig>>>,
    pub store: Store,
    pub gate: Arc<SecurityGate>,
    pub manager: Arc<CrewManager>,
    pub engine: Arc<WorkflowEngine>,
    pub evolution: Arc<EvolutionEngine>,
    pub bus: Arc<InstructionBus>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<RwLock<HealthSummary>>,
    pub started_at: Instant,
}

impl AppContext {
    /// Boots the full component graph: opens the store, recovers state
    /// orphaned by a previous process, and bootstraps the admin key.
    ///
    /// # Errors
    /// Store connectivity failures map to exit code 3, configuration
    /// failures to exit code 2.
    pub async fn build(
        config: ServerConfig,
        runner: Option<Arc<dyn CrewRunner>>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Store::connect(&config.database_url).await?;

        // Restart recovery: anything executing at crash time is surfaced
        // as failed, never silently resumed.
        let orphaned = store.fail_orphaned_workflows("process-restart").await?;
        let reset = store.reset_running_crews().await?;
        if orphaned > 0 || reset > 0 {
            info!(orphaned, reset, "recovered state from previous process");
        }

        auth::bootstrap_admin_key(&store, config.bootstrap_admin_key.clone()).await?;

        let runner = runner.unwrap_or_else(|| {
            if config.simulated_runner {
                Arc::new(SimulatedRunner::default())
            } else {
                Arc::new(UnconfiguredRunner)
            }
        });

        let ids = Arc::new(IdMinter::new(config.deterministic_ids));
        let shared_config = Arc::new(RwLock::new(Arc::new(config)));
        let metrics = Arc::new(Metrics::new());
        let bus = Arc::new(InstructionBus::new(store.clone(), Arc::clone(&ids)));
        let evolution = Arc::new(EvolutionEngine::new(
            store.clone(),
            Arc::clone(&shared_config),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            runner,
            Arc::clone(&bus),
            Arc::clone(&evolution),
            Arc::clone(&shared_config),
            Arc::clone(&metrics),
            Arc::clone(&ids),
        ));
        let manager = Arc::new(CrewManager::new(
            store.clone(),
            Arc::clone(&engine),
            Arc::clone(&bus),
            Arc::clone(&evolution),
            Arc::clone(&ids),
            Arc::clone(&metrics),
        ));
        let gate = Arc::new(SecurityGate::new(store.clone(), Arc::clone(&shared_config)));

        Ok(Self {
            config: shared_config,
            store,
            gate,
            manager,
            engine,
            evolution,
            bus,
            metrics,
            health: Arc::new(RwLock::new(HealthSummary::starting())),
            started_at: Instant::now(),
        })
    }

    #[must_use]
    pub fn current_config(&self) -> Arc<ServerConfig> {
        match self.config.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn swap_config(&self, next: ServerConfig) {
        let mut slot = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Arc::new(next);
    }

    #[must_use]
    pub fn health_snapshot(&self) -> HealthSummary {
        match self.health.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_health(&self, summary: HealthSummary) {
        let mut slot = match self.health.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = summary;
    }

    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
