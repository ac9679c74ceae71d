#![forbid(unsafe_code)]

//! `userhub` operator CLI.
//!
//! Manages users in the hub database and runs a single user's server in the
//! foreground until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use userhub::hub::{HubSettings, SpawnOptions, UserRegistry};
use userhub::models::server::Server;
use userhub::models::user::NewUser;
use userhub::persistence::db;
use userhub::persistence::user_repo::UserRepo;
use userhub::spawner::{PollStatus, Spawner};
use userhub::{AppError, HubConfig, Result};

/// How often `run` checks whether the server is still alive.
const RUN_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "userhub", about = "Per-user notebook server manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a user.
    AddUser {
        /// User name.
        name: String,
        /// Make the user a hub admin.
        #[arg(long)]
        admin: bool,
    },
    /// Delete a user, stopping its server first.
    DeleteUser {
        /// User name.
        name: String,
    },
    /// List users and their last activity.
    List,
    /// Spawn a user's server and keep it running until interrupted.
    Run {
        /// User name.
        name: String,
        /// Named-server slot, when named servers are enabled.
        #[arg(long)]
        server_name: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = HubConfig::load_from_path(&args.config)?;
    info!(config = %args.config.display(), "configuration loaded");

    let db = Arc::new(db::connect(&config.db_path).await?);
    info!(path = %config.db_path.display(), "database connected");

    match args.command {
        Command::AddUser { name, admin } => {
            let user = UserRepo::new(Arc::clone(&db))
                .create(&NewUser { name, admin })
                .await?;
            info!(user = %user.name, id = user.id, admin = user.admin, "user added");
        }
        Command::DeleteUser { name } => {
            let registry = UserRegistry::new(Arc::clone(&db), HubSettings::from_config(&config, &db));
            registry.delete(name.as_str()).await?;
        }
        Command::List => {
            for user in UserRepo::new(Arc::clone(&db)).list().await? {
                println!(
                    "{}\t{}\t{}",
                    user.name,
                    if user.admin { "admin" } else { "user" },
                    user.last_activity.to_rfc3339()
                );
            }
        }
        Command::Run { name, server_name } => {
            let registry = UserRegistry::new(Arc::clone(&db), HubSettings::from_config(&config, &db));
            run_server(&registry, &name, server_name).await?;
        }
    }

    Ok(())
}

/// Spawn `name`'s server, wait for a shutdown signal or for the server to
/// exit on its own, then stop it.
async fn run_server(registry: &UserRegistry, name: &str, server_name: Option<String>) -> Result<()> {
    let session = registry.get(name).await?;
    let mut session = session.lock().await;

    let options = SpawnOptions {
        server_name,
        ..SpawnOptions::default()
    };
    session.spawn(options).await?;
    let url = session.server().map_or_else(|| session.url(), Server::url);
    println!("{url}");

    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        code = wait_for_exit(session.spawner_mut()) => {
            warn!(user = %name, code, "server exited on its own");
        }
    }

    if let Err(err) = session.stop().await {
        error!(user = %name, %err, "failed to stop server");
        return Err(err);
    }
    Ok(())
}

async fn wait_for_exit(spawner: &mut dyn Spawner) -> i32 {
    loop {
        tokio::time::sleep(RUN_POLL_INTERVAL).await;
        match spawner.poll().await {
            Ok(PollStatus::Running) => {}
            Ok(PollStatus::Exited(code)) => return code,
            Err(err) => warn!(%err, "failed to poll server"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
