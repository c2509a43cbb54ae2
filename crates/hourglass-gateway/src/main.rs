use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hourglass_core::HourglassConfig;
use hourglass_scheduler::{Clock, SchedulerEngine, ShellRunner, SystemClock, TaskStore};
use tracing::info;

mod app;
mod http;

#[derive(Debug, Parser)]
#[command(name = "hourglass-gateway", version, about = "Durable one-shot task scheduler")]
struct Cli {
    /// Path to hourglass.toml (falls back to $HOURGLASS_CONFIG, then ~/.hourglass/hourglass.toml)
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hourglass_gateway=info,hourglass_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > HOURGLASS_CONFIG env > ~/.hourglass/hourglass.toml
    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("HOURGLASS_CONFIG").ok());
    let config = HourglassConfig::load(config_path.as_deref())?;

    let db_path = config.database.path.clone();
    config.database.ensure_parent_dir()?;
    info!(path = %db_path, "opening SQLite database");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // HTTP surface gets its own connection; the engine opens one per loop.
    let store = Arc::new(TaskStore::open(&db_path, Arc::clone(&clock))?);
    let engine = SchedulerEngine::open(
        &db_path,
        &config.worker,
        &config.recovery,
        Arc::new(ShellRunner::new()),
        clock,
    )?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store));
    let router = app::build_router(state);

    info!("Hourglass gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop claiming; in-flight tasks run to completion or their timeout
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    info!("Hourglass gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
