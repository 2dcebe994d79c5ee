//! Referral compensation service
//!
//! HTTP API over the compensation engine plus the daily-return and reward
//! refresh jobs.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::Path;
use std::time::Duration;
use tokio::{net::TcpListener, time::interval};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use referral_engine::{
    api, config::ServiceConfig, CompensationEngine, EngineResult, LedgerStore,
};

#[derive(Parser, Debug)]
#[command(name = "referral-engine")]
#[command(about = "Referral compensation engine: binary tree, rewards and commissions")]
struct Args {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    database_path: Option<String>,

    /// HTTP port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Compensation TOML file (overrides COMPENSATION_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// Seconds between daily-return passes
    #[arg(long)]
    daily_return_interval_secs: Option<u64>,

    /// Seconds between full reward refreshes
    #[arg(long)]
    reward_refresh_interval_secs: Option<u64>,

    /// Run one daily-return pass and one reward refresh, then exit
    #[arg(long)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let mut cfg = ServiceConfig::from_env()?;
    if let Some(path) = args.database_path {
        cfg.database_path = path;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(path) = args.config {
        cfg.compensation_config = Some(path);
    }
    if let Some(secs) = args.daily_return_interval_secs.filter(|&s| s > 0) {
        cfg.daily_return_interval_secs = secs;
    }
    if let Some(secs) = args.reward_refresh_interval_secs.filter(|&s| s > 0) {
        cfg.reward_refresh_interval_secs = secs;
    }

    info!("🚀 Referral compensation engine starting");

    let engine_config = cfg.engine_config()?;
    info!(
        "⚙️  Referral {:?}% | rebate {:?}% | purchase bonus {}%",
        engine_config.referral_pct, engine_config.rebate_pct, engine_config.purchase_bonus_pct
    );

    let store = LedgerStore::open(&cfg.database_path)
        .with_context(|| format!("Failed to open ledger at {}", cfg.database_path))?;
    let engine = CompensationEngine::new(store, engine_config)
        .context("Invalid compensation configuration")?;

    if args.run_once {
        run_job(engine.clone(), "daily returns", |e| e.run_daily_returns().map(|_| ())).await;
        run_job(engine, "reward refresh", |e| {
            e.refresh_all_reward_progress().map(|_| ())
        })
        .await;
        return Ok(());
    }

    tokio::spawn(daily_return_polling(
        engine.clone(),
        cfg.daily_return_interval_secs,
    ));
    tokio::spawn(reward_refresh_polling(
        engine.clone(),
        cfg.reward_refresh_interval_secs,
    ));

    let app = api::create_router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Pay due investments on a fixed cadence.
async fn daily_return_polling(engine: CompensationEngine, poll_secs: u64) {
    info!("📅 Starting daily-return job (every {}s)", poll_secs);
    let mut ticker = interval(Duration::from_secs(poll_secs));
    loop {
        ticker.tick().await;
        run_job(engine.clone(), "daily returns", |e| {
            e.run_daily_returns().map(|_| ())
        })
        .await;
    }
}

/// Recompute reward progress for every active investor.
async fn reward_refresh_polling(engine: CompensationEngine, poll_secs: u64) {
    info!("🔄 Starting reward refresh job (every {}s)", poll_secs);
    let mut ticker = interval(Duration::from_secs(poll_secs));
    loop {
        ticker.tick().await;
        run_job(engine.clone(), "reward refresh", |e| {
            e.refresh_all_reward_progress().map(|_| ())
        })
        .await;
    }
}

async fn run_job<F>(engine: CompensationEngine, name: &'static str, job: F)
where
    F: FnOnce(&CompensationEngine) -> EngineResult<()> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || job(&engine)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("❌ {} job failed: {}", name, e),
        Err(e) => error!("❌ {} job panicked: {}", name, e),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "referral_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let env_file = manifest_dir.join(".env");
    if env_file.exists() {
        let _ = dotenv::from_path(&env_file);
    }
}
