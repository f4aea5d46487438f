//! Tombola Server
//!
//! Scheduled state-transition daemon for an event-registration platform:
//! opens registration windows, runs capacity-constrained lotteries over
//! waitlists, and expires unanswered invitations at event start.

mod config;
mod shutdown;

use clap::Parser;
use config::{FileConfig, get_database_url};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tombola_core::clock::system_clock;
use tombola_core::events::{expiry_tick_channel, lottery_tick_channel, open_tick_channel};
use tombola_core::processors::{LotteryRunner, PendingExpirer, RegistrationOpener, Scheduler};
use tombola_core::store::{EventStore, MemoryStore, NotificationSink, PgStore, ProfileDirectory};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Tombola - lottery and list-transition engine for event registration
#[derive(Parser, Debug)]
#[command(name = "tombola-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./tombola-config.toml")]
    config: PathBuf,

    /// Create database tables on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Run against an in-memory store instead of Postgres (demo mode)
    #[arg(long, default_value = "false")]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting tombola-server v{}", env!("CARGO_PKG_VERSION"));

    let file_config = FileConfig::load_or_default(&args.config)?;
    let schedule = file_config.job_schedule();

    // Storage seams: one backend provides all three collaborators.
    let store: Arc<dyn EventStore>;
    let profiles: Arc<dyn ProfileDirectory>;
    let notifications: Arc<dyn NotificationSink>;
    let mut pool: Option<PgPool> = None;

    if args.memory {
        tracing::warn!("Running with the in-memory store; state is lost on exit");
        let memory = Arc::new(MemoryStore::new());
        store = memory.clone();
        profiles = memory.clone();
        notifications = memory;
    } else {
        let database_url = get_database_url().map_err(|e| {
            tracing::error!("DATABASE_URL environment variable not set");
            e
        })?;

        tracing::info!("Connecting to database...");
        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to database: {}", e);
                e
            })?;
        tracing::info!("Database connection established");

        let pg = PgStore::new(db_pool.clone());
        if args.migrate {
            tracing::info!("Creating database tables...");
            pg.ensure_schema().await?;
            tracing::info!("Schema ready");
        }

        let pg = Arc::new(pg);
        store = pg.clone();
        profiles = pg.clone();
        notifications = pg;
        pool = Some(db_pool);
    }

    let clock = system_clock();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (open_tx, open_rx) = open_tick_channel();
    let (lottery_tx, lottery_rx) = lottery_tick_channel();
    let (expiry_tx, expiry_rx) = expiry_tick_channel();

    let opener = RegistrationOpener::new(
        store.clone(),
        clock.clone(),
        open_rx,
        shutdown_rx.clone(),
    );
    let runner = LotteryRunner::new(
        store.clone(),
        profiles,
        notifications,
        clock.clone(),
        lottery_rx,
        shutdown_rx.clone(),
    );
    let expirer = PendingExpirer::new(store, clock, expiry_rx, shutdown_rx.clone());

    let mut handles = Scheduler::new(schedule, shutdown_rx).spawn(open_tx, lottery_tx, expiry_tx);
    handles.push(tokio::spawn(opener.run()));
    handles.push(tokio::spawn(runner.run()));
    handles.push(tokio::spawn(expirer.run()));

    shutdown::shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }

    if let Some(pool) = pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
