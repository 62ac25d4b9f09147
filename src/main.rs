//! Tunneller agent: dials out to a gateway's control channel, registers a
//! domain, and forwards whatever the gateway connects back for — either a
//! fixed raw target or a path-routed set of local/internal services.
//!
//! Startup sequence mirrors `router-core::main`: init logging, load
//! configuration, install a `ctrlc` SIGINT handler that drives the same
//! teardown path the admin surface exposes, then run the control channel
//! and the admin HTTP server side by side until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;

mod admin;
mod config;
mod control;
mod error;
mod http;
mod pipe;
mod resources;
mod routing;
mod stats;
mod tls;

use config::{Config, ConfigStore};
use control::client::ControlClient;
use resources::ResourceTracker;
use stats::ConnectionStats;

/// Command-line arguments, matching `router-cli`'s `#[derive(Parser)]`
/// shape.
#[derive(Parser, Debug)]
#[command(name = "tunneller", about = "Reverse-tunnel agent")]
struct Args {
    /// Path to the JSON config file. Defaults to
    /// `<home>/.tunneller/tunneller-config.json`.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Overrides `RUST_LOG` for this run (e.g. "debug", "tunneller=trace").
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Connect to the gateway immediately on startup instead of waiting for
    /// an admin `/client/start` call.
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(level) = &args.log_level {
        std::env::set_var("RUST_LOG", level);
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config_path = args.config.unwrap_or_else(Config::default_path);
    log::info!("loading config from {}", config_path.display());
    let config = Config::load(&config_path)?;
    let admin_port = config.admin_port;

    let config_store = ConfigStore::new(config, config_path);
    let stats = Arc::new(ConnectionStats::new());
    let resources = Arc::new(ResourceTracker::new());
    let control = ControlClient::new(config_store.clone(), stats.clone(), resources.clone());

    config_store.set_listener(Box::new({
        let control = control.clone();
        move || log::debug!("[config] routes republished, control state is {:?}", control.state())
    }));

    let admin_state = Arc::new(admin::AdminState {
        config_store: config_store.clone(),
        stats: stats.clone(),
        resources: resources.clone(),
        control: control.clone(),
        client_task: Mutex::new(None),
    });

    let shutting_down = Arc::new(AtomicBool::new(false));
    {
        let control = control.clone();
        let config_store = config_store.clone();
        let shutting_down = shutting_down.clone();
        ctrlc::set_handler(move || {
            if shutting_down.swap(true, Ordering::SeqCst) {
                return;
            }
            log::info!("SIGINT received, shutting down...");
            control.disconnect();
            if let Err(e) = config_store.persist() {
                log::error!("failed to persist config on shutdown: {e}");
            }
        })?;
    }

    if args.autostart {
        let control = control.clone();
        *admin_state.client_task.lock().unwrap() = Some(tokio::spawn(async move { control.run().await }));
    }

    admin::run(admin_port, admin_state).await?;
    Ok(())
}
