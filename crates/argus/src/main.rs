//! Argus command line entrypoint.

mod api;

use anyhow::{Context, Result};
use argus_engine::jobs::manager::{default_launcher, JobManager};
use argus_engine::CronScheduler;
use argus_logging::{init_logging, LogOptions};
use argus_protocol::JobSpec;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "argus", about = "Local media indexing and search", version)]
struct Cli {
    /// Verbose console output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the index API server (jobs, search, cron).
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:6339", env = "ARGUS_LISTEN")]
        listen: SocketAddr,
    },
    /// Run the inference service.
    Inferd {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:6342", env = "ARGUS_INFERD_LISTEN")]
        listen: SocketAddr,
        /// Base model configuration directory.
        #[arg(long, env = "ARGUS_INFERENCE_CONFIG")]
        config_dir: Option<PathBuf>,
        /// User override configuration directory.
        #[arg(long, env = "ARGUS_INFERENCE_USER_CONFIG")]
        user_config_dir: Option<PathBuf>,
    },
    /// Internal: execute one job in this process (spawned by the job
    /// manager).
    #[command(hide = true)]
    JobWorker {
        /// Serialized job spec.
        #[arg(long)]
        spec: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { listen } => {
            init_logging(LogOptions {
                app_name: "argus",
                verbose: cli.verbose,
                retention_days: None,
            })?;
            run_server(listen)
        }
        Command::Inferd {
            listen,
            config_dir,
            user_config_dir,
        } => {
            init_logging(LogOptions {
                app_name: "argus-inferd",
                verbose: cli.verbose,
                retention_days: None,
            })?;
            run_inferd(listen, config_dir, user_config_dir)
        }
        Command::JobWorker { spec } => {
            init_logging(LogOptions {
                app_name: "argus-worker",
                verbose: cli.verbose,
                retention_days: None,
            })?;
            let spec: JobSpec =
                serde_json::from_str(&spec).context("invalid job spec payload")?;
            argus_engine::jobs::worker::execute_job(&spec)
        }
    }
}

fn run_server(listen: SocketAddr) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        ensure_default_index()?;

        let manager = JobManager::start(default_launcher());
        let client = Arc::new(
            argus_client::DistributedClient::new(
                argus_engine::util::inference_api_urls(),
                argus_engine::util::inference_api_url_weights(),
            )
            .context("failed to build inference client")?,
        );

        // Cron evaluator: at most one tick a minute.
        let cron_manager = Arc::clone(&manager);
        let cron_client = Arc::clone(&client);
        tokio::spawn(async move {
            let scheduler = CronScheduler::new();
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                scheduler.tick(&cron_manager, &cron_client).await;
            }
        });

        let listener = tokio::net::TcpListener::bind(listen).await?;
        info!("Argus API listening on {listen}");
        axum::serve(listener, api::router(manager, client)).await?;
        Ok(())
    })
}

fn run_inferd(
    listen: SocketAddr,
    config_dir: Option<PathBuf>,
    user_config_dir: Option<PathBuf>,
) -> Result<()> {
    let base_dir = config_dir.unwrap_or_else(|| {
        argus_logging::argus_home().join("config").join("inference")
    });
    std::fs::create_dir_all(&base_dir)
        .with_context(|| format!("failed to create {}", base_dir.display()))?;
    let registry = argus_inferd::ConfigRegistry::new(base_dir, user_config_dir);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(argus_inferd::serve(listen, registry))?;
    Ok(())
}

/// Make sure the default index database exists with its schema.
fn ensure_default_index() -> Result<()> {
    let path = argus_db::paths::index_db_path("default");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = argus_db::IndexDb::open(&path, argus_db::AccessMode::ReadWrite)?;
    argus_db::schema::init_schema(&db)?;
    Ok(())
}
