//! enrollwatch - New Student Registration Alerts
//!
//! Watches a Firestore collection and posts a Telegram message for every
//! newly added student document.

use anyhow::Result;
use clap::Parser;
use enrollwatch::{app::App, cli::Cli, config::Config, internal_metrics};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            // The configured log level is unknown at this point.
            tracing_subscriber::fmt().with_target(false).init();
            error!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("enrollwatch starting up...");
    log_config_summary(&config);

    // =========================================================================
    // Metrics recorder
    // =========================================================================
    let prom_handle = if config.metrics.enabled {
        Some(internal_metrics::install_prometheus()?)
    } else {
        None
    };

    // =========================================================================
    // Build and run
    // =========================================================================
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = match App::builder(config)
        .prometheus_handle(prom_handle)
        .build(shutdown_rx)
        .await
    {
        Ok(app) => app,
        Err(err) => {
            error!("Failed to start: {:#}", err);
            std::process::exit(1);
        }
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("enrollwatch stopped.");
    Ok(())
}

fn log_config_summary(config: &Config) {
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Telegram API: {}", config.telegram.api_url);
    info!("Telegram Chat: {}", config.telegram.chat_id);
    info!("Telegram Timeout: {}s", config.telegram.timeout_seconds);
    info!("Firestore Collection: {}", config.firestore.collection);
    info!("Firestore Database: {}", config.firestore.database);
    info!("Firestore Poll Interval: {}ms", config.firestore.poll_interval_ms);
    match &config.firestore.emulator_host {
        Some(host) => info!("Firestore Emulator: {}", host),
        None => info!("Firestore API: {}", config.firestore.api_url),
    }
    info!(
        "Credentials: {}",
        if config.firestore.credentials_json.is_some() {
            "inline JSON".to_string()
        } else {
            config
                .firestore
                .credentials_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }
    );
    if config.liveness.enabled {
        info!("Liveness Endpoint: {}", config.liveness.listen_address);
    } else {
        info!("Liveness Endpoint: Disabled");
    }
    info!(
        "Prometheus Metrics: {}",
        if config.metrics.enabled { "Enabled" } else { "Disabled" }
    );
    info!("-------------------------------------------------------");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
