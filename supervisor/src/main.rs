//! Agent supervisor entry point.

use agent_supervisor::{create_app, AppState, Config, ProcessSupervisor};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let supervisor = ProcessSupervisor::new(&config.runs_root, config.agent_command())
        .context("failed to prepare runs root")?;
    info!(
        runs_root = %config.runs_root.display(),
        command = %config.agent_command,
        "starting agent supervisor"
    );

    let app = create_app(AppState::new(supervisor));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("agent supervisor listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agent_supervisor=debug,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
