use clap::Parser;
use hl7_mllp_bridge::settings::{self, Mode};
use hl7_mllp_bridge::{client, listener, logging, proxy::ProxySupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "hl7-mllp-bridge", version, about = "HL7 v2 MLLP proxy/bridge between an analyzer and a LIS")]
struct Cli {
    /// Path to the JSON settings document.
    #[arg(long, default_value = "./hl7proxy.config.json")]
    config: PathBuf,

    /// Override the tracing log level (e.g. "info", "debug").
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let settings = match settings::load(&cli.config) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load config");
            std::process::exit(1);
        }
    };

    info!(mode = ?settings.mode, "hl7-mllp-bridge starting");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match settings.mode {
        Mode::Server => {
            if let Err(e) = listener::run(settings, shutdown_rx).await {
                error!(error = %e, "listener mode failed to bind");
                std::process::exit(1);
            }
        }
        Mode::Client => {
            client::run(settings, shutdown_rx).await;
        }
        Mode::Proxy => {
            ProxySupervisor::new().run(settings, shutdown_rx).await;
        }
    }
}
