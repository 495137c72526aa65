//! The wazo-plugind daemon.
//!
//! Startup order matters: the root worker is spawned while the process
//! still runs as root, privileges are dropped, and only then do the bus
//! connection, the plugin service and the HTTP server come up. Shutdown is
//! the reverse: stop serving, drain the pipelines, stop the worker, close
//! the bus.

use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plugind_bus::BusPublisher;
use plugind_core::Config;
use plugind_server::{AppState, AuthClient};
use plugind_service::PluginService;
use plugind_worker::RootWorker;

#[derive(Parser)]
#[command(name = "wazo-plugind")]
#[command(version, about = "Plugin management daemon", long_about = None)]
struct Cli {
    /// The path to the config file
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Log debug messages, overriding the configured log level
    #[arg(short, long)]
    debug: bool,

    /// The owner of the daemon process
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the privileged worker loop (spawned by the daemon itself)
    RootWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::RootWorker)) {
        // stdout is the worker's reply channel, logs go to stderr
        init_logging("info", false);
        plugind_worker::child::run().await?;
        return Ok(());
    }

    let mut config = Config::load(cli.config_file.as_deref())?;
    if cli.debug {
        config.debug = true;
    }
    if let Some(user) = cli.user {
        config.user = Some(user);
    }

    init_logging(&config.log_level, config.debug);
    run(config).await
}

fn init_logging(level: &str, debug: bool) {
    let level = if debug { "debug" } else { level };
    let directives = [
        "plugind_core",
        "plugind_market",
        "plugind_bus",
        "plugind_worker",
        "plugind_service",
        "plugind_server",
        "plugind_daemon",
    ]
    .map(|krate| format!("{krate}={level}"))
    .join(",");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directives.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    if let Err(e) = std::env::set_current_dir(&config.home_dir) {
        warn!("cannot change directory to {}: {e}", config.home_dir.display());
    }

    // the worker must fork before we give up root
    let root_worker = Arc::new(RootWorker::spawn().context("cannot start the root worker")?);
    if let Some(user) = &config.user {
        drop_privileges(user)?;
    }

    let publisher = Arc::new(connect_bus(&config).await?);
    let service = PluginService::new(config.clone(), publisher.clone(), root_worker.clone());
    let auth = Arc::new(AuthClient::new(&config.auth));
    let state = AppState::new(config.clone(), service.clone(), auth);

    tokio::spawn(learn_master_tenant(state.clone()));

    let shutdown = {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        async move {
            tokio::select! {
                _ = sigterm.recv() => warn!("stopping wazo-plugind: SIGTERM"),
                _ = sigint.recv() => warn!("stopping wazo-plugind: SIGINT"),
            }
        }
    };

    plugind_server::serve(&config, state, shutdown).await?;

    // teardown: running pipelines first, then the privileged helper,
    // finally the bus connection
    service.drain().await;
    root_worker.stop().await;
    publisher.close().await;
    info!("wazo-plugind stopped");
    Ok(())
}

async fn connect_bus(config: &Arc<Config>) -> anyhow::Result<BusPublisher> {
    let mut attempts = 0;
    loop {
        match BusPublisher::connect(&config.bus, config.uuid.clone()).await {
            Ok(publisher) => return Ok(publisher),
            Err(e) if attempts < 5 => {
                attempts += 1;
                warn!("bus connection failed ({e}), retrying...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(e) => return Err(anyhow!(e)).context("cannot connect to the bus"),
        }
    }
}

/// Poll the identity service until the master tenant is known. Protected
/// routes answer 503 `not-initialized` in the meantime.
async fn learn_master_tenant(state: AppState) {
    loop {
        if state.master_tenant().is_some() {
            return;
        }
        match state.auth.master_tenant().await {
            Ok(tenant_uuid) => {
                state.set_master_tenant(tenant_uuid);
                return;
            }
            Err(e) => {
                debug!("master tenant is not available yet: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

fn drop_privileges(user: &str) -> anyhow::Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        warn!("not running as root, keeping the current user");
        return Ok(());
    }

    let account = nix::unistd::User::from_name(user)
        .with_context(|| format!("cannot look up user {user}"))?
        .ok_or_else(|| anyhow!("unknown user {user}"))?;

    nix::unistd::setgid(account.gid).context("setgid failed")?;
    let name = CString::new(account.name.as_str())?;
    nix::unistd::initgroups(&name, account.gid).context("initgroups failed")?;
    nix::unistd::setuid(account.uid).context("setuid failed")?;

    info!("dropped privileges to {user}");
    Ok(())
}
