use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use restreamer::{
    config::Config,
    database::Database,
    engine::{StreamEngine, SystemClock},
    models::LifecycleState,
    notifications::{telegram::TelegramForwarder, Notifier},
    repositories::{SqliteStreamRepository, StreamStore, VideoRepository},
    scheduler::ReconciliationLoop,
    services::{recover_videos, StreamService},
    supervisor::{ffmpeg::FfmpegLauncher, ProcessSupervisor},
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "restreamer")]
#[command(version)]
#[command(about = "Scheduled re-streaming of stored videos to RTMP destinations")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and HTTP API (default)
    Serve,
    /// Register video files in the upload directory that have no record
    RecoverVideos,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("restreamer={},tower_http=trace", cli.log_level)
    } else {
        format!("restreamer={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Restreamer v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let videos = Arc::new(VideoRepository::new(database.pool()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::RecoverVideos => {
            let report = recover_videos(&videos, &config.storage.video_path).await?;
            println!(
                "Scanned {} files: {} recovered, {} already registered",
                report.scanned, report.recovered, report.skipped
            );
            Ok(())
        }
        Command::Serve => serve(config, database, videos).await,
    }
}

async fn serve(config: Config, database: Database, videos: Arc<VideoRepository>) -> Result<()> {
    let store = Arc::new(SqliteStreamRepository::new(database.pool()));
    let notifier = Notifier::default();
    let launcher = Arc::new(FfmpegLauncher::new(config.broadcast.clone()));
    let supervisor = ProcessSupervisor::new(
        launcher,
        store.clone(),
        notifier.clone(),
        config.scheduler.kill_timeout()?,
    );
    let engine = Arc::new(StreamEngine::new(
        store.clone(),
        supervisor.clone(),
        notifier.clone(),
        Arc::new(SystemClock),
        config.scheduler.timezone()?,
    ));

    if config.scheduler.sweep_on_startup {
        let destinations: Vec<String> = store
            .list_all()
            .await?
            .into_iter()
            .filter(|s| s.state == LifecycleState::Live)
            .map(|s| s.destination_url())
            .collect();
        if !destinations.is_empty() {
            info!("Sweeping {} destinations persisted as live", destinations.len());
            supervisor.sweep_ghosts(&destinations).await;
        }
    }

    let cancellation_token = CancellationToken::new();

    if let Some(forwarder) = TelegramForwarder::from_config(&config.notifications)? {
        let events = notifier.subscribe();
        let token = cancellation_token.clone();
        tokio::spawn(async move { forwarder.run(events, token).await });
    }

    let reconciliation = ReconciliationLoop::new(
        engine.clone(),
        config.scheduler.tick_interval()?,
        config.scheduler.reconcile_deadline()?,
    );
    let scheduler_handle = {
        let token = cancellation_token.clone();
        tokio::spawn(async move { reconciliation.run(token).await })
    };

    let state = AppState {
        streams: Arc::new(StreamService::new(
            engine,
            config.broadcast.rtmp_base_url.clone(),
        )),
        videos,
        supervisor: supervisor.clone(),
    };
    let web_server = WebServer::new(&config.web, state)?;
    let mut web_handle = {
        let token = cancellation_token.clone();
        tokio::spawn(async move { web_server.serve(token).await })
    };

    let web_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            cancellation_token.cancel();
            web_handle.await
        }
        joined = &mut web_handle => joined,
    };
    match web_result {
        Ok(Err(e)) => error!("Web server failed: {}", e),
        Err(e) => error!("Web server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    cancellation_token.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Reconciliation loop task failed: {}", e);
    }
    supervisor.shutdown().await;

    info!("Restreamer stopped");
    Ok(())
}
