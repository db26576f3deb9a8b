use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use storefront_backup::config::AppConfig;
use storefront_backup::db::connection::{close_pool, create_pool, sqlite_path};
use storefront_backup::db::migrate::migrate;
use storefront_backup::models::user;
use storefront_backup::routes;
use storefront_backup::services::backup_scheduler::{BackupScheduler, Trigger};
use storefront_backup::state::AppState;
use storefront_backup::utils;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the backup scheduler (default)
    Serve,
    /// Create one backup now
    Backup,
    /// Restore the database from an archive in the backup directory
    Restore { file_name: String },
    /// List archives of the active method
    List,
    /// Delete all but the newest archives
    Clean {
        #[arg(short, long, default_value_t = 10)]
        keep: usize,
    },
    /// Manage admin users
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Create an admin and print its API token
    Add {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    utils::logger::init(log_level)?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let db_path = sqlite_path(&database_url)
        .with_context(|| format!("unsupported DATABASE_URL: {database_url}"))?;

    std::fs::create_dir_all(&config.data_dir)?;
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;

    let state = Arc::new(AppState::new(pool, config));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state.clone()).await?,
        Command::Backup => match state.runner.run(Trigger::Manual).await? {
            Some(backup) => println!("{} ({} MB)", backup.path.display(), backup.size),
            None => anyhow::bail!("a backup is already in progress"),
        },
        Command::Restore { file_name } => {
            let report = state.runner.restore(&file_name).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List => {
            let overview = state.backups.overview().await?;
            for archive in &overview.backups {
                println!(
                    "{}\t{:.2} MB\t{}",
                    archive.name,
                    archive.size,
                    archive.modified_at.to_rfc3339()
                );
            }
            println!(
                "{} {} archives, {:.2} MB total",
                overview.stats.count, overview.method, overview.stats.total_size
            );
        }
        Command::Clean { keep } => {
            let report = state.backups.clean(keep).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Admin(AdminCommand::Add { email, name }) => {
            let conn = state.db.get()?;
            let admin = user::create_admin(&conn, &email, &name)?;
            println!("{}", admin.api_token.unwrap_or_default());
        }
    }

    close_pool(&state.db);
    Ok(())
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let config = state.config.clone();
    tracing::info!("Starting storefront backup service on port {}", config.port);

    let cancel = CancellationToken::new();

    // A marker left by a crashed run is reported whether or not schedules are on
    state.runner.flag().recover_stale();

    let scheduler = if config.schedule_enabled {
        match BackupScheduler::new(state.runner.clone()).await {
            Ok(s) => {
                if let Err(e) = s.init_schedules(&config.daily_cron, &config.weekly_cron).await {
                    tracing::warn!("Failed to initialize schedules: {}", e);
                }
                if let Err(e) = s.start().await {
                    tracing::warn!("Failed to start scheduler: {}", e);
                }
                Some(s)
            }
            Err(e) => {
                tracing::warn!("Failed to create scheduler: {}", e);
                None
            }
        }
    } else {
        tracing::info!("[Scheduler] Scheduled backups disabled");
        None
    };

    let app = routes::create_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("Scheduler shutdown error: {}", e);
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = cancel.cancelled() => {},
    }

    cancel.cancel();
}
