use crate::cli::{Cli, Command};
use clap::Parser;
use crewd::app::AppContext;
use crewd::config::ServerConfig;
use crewd::security::auth;
use crewd::store::Store;
use crewd::supervisor::Supervisor;
use crewd::{CrewError, Result};
use serde_json::json;
use tracing::info;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Doctor => doctor(config).await,
        Command::InitDb => init_db(config).await,
        Command::MintKey {
            client,
            permissions,
        } => mint_key(config, &client, permissions).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.data_root)
        .await
        .map_err(|e| CrewError::Config(format!("cannot create data root: {e}")))?;
    let ctx = AppContext::build(config, None).await?;
    let supervisor = Supervisor::spawn(&ctx);
    info!("crewd serving");
    let result = crewd::server::run(ctx).await;
    supervisor.shutdown().await;
    result
}

async fn doctor(config: ServerConfig) -> Result<()> {
    let store_status = match Store::connect(&config.database_url).await {
        Ok(store) => match store.ping().await {
            Ok(()) => "ok",
            Err(_) => "unreachable",
        },
        Err(_) => "unreachable",
    };
    let report = json!({
        "config": config.sanitized_snapshot(),
        "store": store_status,
        "data_root_writable": tokio::fs::create_dir_all(&config.data_root).await.is_ok(),
    });
    println!("{report:#}");
    if store_status == "ok" {
        Ok(())
    } else {
        Err(CrewError::Unavailable("store unreachable".to_string()))
    }
}

async fn init_db(config: ServerConfig) -> Result<()> {
    tokio::fs::create_dir_all(&config.data_root)
        .await
        .map_err(|e| CrewError::Config(format!("cannot create data root: {e}")))?;
    let store = Store::connect(&config.database_url).await?;
    auth::bootstrap_admin_key(&store, config.bootstrap_admin_key.clone()).await?;
    println!("database initialized at {}", config.database_url);
    Ok(())
}

async fn mint_key(config: ServerConfig, client: &str, permissions: Vec<String>) -> Result<()> {
    let store = Store::connect(&config.database_url).await?;
    let raw = auth::mint_key(&store, client, permissions, None).await?;
    // Printed exactly once; only the hash is stored.
    println!("{raw}");
    Ok(())
}
