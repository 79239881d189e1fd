//! flotillad — the Flotilla daemon.
//!
//! # Usage
//!
//! ```text
//! flotillad serve --config /etc/flotilla/flotilla.toml --port 8480
//! flotillad check --config flotilla.toml --label "linux && docker"
//! flotillad terminate --config flotilla.toml 4f2a9c1e
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use flotilla_core::{ExpressionMatcher, FlotillaConfig};
use flotilla_provision::CloudProvisioner;
use flotilla_registry::{ConfigCredentialStore, InMemoryRegistry};
use flotilla_runtime::{CommandRunner, InstanceId, InstanceTerminator, ProcessRunner};
use flotillad::dry_run::dry_run_runner;
use flotillad::{AppState, build_router};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,flotilla=debug,flotillad=debug";

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla provisioning daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the provisioner and its API.
    Serve {
        #[arg(long, default_value = "flotilla.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Log runtime CLI commands instead of running them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a config file and show which template a label selects.
    Check {
        #[arg(long, default_value = "flotilla.toml")]
        config: PathBuf,

        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a backing instance by id.
    Terminate {
        #[arg(long, default_value = "flotilla.toml")]
        config: PathBuf,

        instance: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            port,
            dry_run,
        } => serve(&config, port, dry_run).await,
        Command::Check { config, label } => check(&config, label.as_deref()),
        Command::Terminate { config, instance } => terminate(&config, &instance).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<FlotillaConfig> {
    FlotillaConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn serve(config_path: &Path, port: u16, dry_run: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    info!(cloud = %config.cloud.name, dry_run, "flotillad starting");

    let runner: Arc<dyn CommandRunner> = if dry_run {
        Arc::new(dry_run_runner())
    } else {
        Arc::new(ProcessRunner)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let provisioner = CloudProvisioner::from_config(
        &config,
        Arc::new(ExpressionMatcher),
        Arc::new(InMemoryRegistry::new()),
        Arc::new(ConfigCredentialStore::new(config.credentials.clone())),
        runner,
        shutdown_rx,
    )?;

    let state = AppState::new(Arc::new(provisioner));
    let router = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Cancelled tasks deregister their nodes and remove their instances.
    state.drain().await;
    info!("flotillad stopped");
    Ok(())
}

fn check(config_path: &Path, label: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let provisioner = CloudProvisioner::from_config(
        &config,
        Arc::new(ExpressionMatcher),
        Arc::new(InMemoryRegistry::new()),
        Arc::new(ConfigCredentialStore::new(config.credentials.clone())),
        Arc::new(ProcessRunner),
        shutdown_rx,
    )?;

    println!("{}: ok ({} templates)", config_path.display(), provisioner.templates().len());
    let Some(template) = provisioner
        .template_for(label)
        .with_context(|| format!("parsing label {label:?}"))?
    else {
        bail!("no template satisfies label {}", label.unwrap_or("<any>"));
    };
    println!(
        "{} -> {} ({} {}, workdir {})",
        label.unwrap_or("<any>"),
        template.display_name(provisioner.cloud_name()),
        template.image(),
        template.size(),
        template.remote_root(),
    );
    Ok(())
}

async fn terminate(config_path: &Path, instance: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let instance = InstanceId::new(instance).context("instance id must not be blank")?;
    InstanceTerminator::new(Arc::new(ProcessRunner), &config.cloud.cli)
        .terminate(&instance)
        .await?;
    println!("removed {instance}");
    Ok(())
}
