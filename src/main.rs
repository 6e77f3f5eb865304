//! UniFi Protect Exporter Binary Entry Point
//!
//! Core functionality is provided by the `protect_exporter` library crate.

use clap::Parser;
use protect_exporter::{
    collector::{self, CollectorContext, Scheduler},
    config::Settings,
    metrics::MetricRegistry,
    server::{AppState, VERSION, create_router, register_exporter_metrics},
    upstream::{ProtectConnector, UpstreamGate},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus exporter for UniFi Protect
#[derive(Parser, Debug)]
#[command(name = "protect-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "UNIFI_PROTECT_EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file and environment)
    #[arg(long)]
    listen_host: Option<String>,

    /// Listen port (overrides config file and environment)
    #[arg(long)]
    listen_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration (defaults < file < env < CLI)
    let mut settings = Settings::load_layered(cli.config.as_deref(), std::env::vars())?;
    if let Some(host) = cli.listen_host {
        settings.server.host = host;
    }
    if let Some(port) = cli.listen_port {
        settings.server.port = port;
    }
    settings.validate()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = VERSION, "UniFi Protect Exporter");
    tracing::info!(
        console = %format!("{}:{}", settings.unifi.host, settings.unifi.port),
        username = %settings.unifi.username,
        verify_ssl = settings.unifi.verify_ssl,
        "Upstream console"
    );

    let settings = Arc::new(settings);
    let metrics = Arc::new(MetricRegistry::new(settings.monitoring.namespace.clone()));
    register_exporter_metrics(&metrics)?;

    let connector = ProtectConnector::from_settings(&settings);
    let gate = UpstreamGate::new(Arc::new(connector), settings.api.concurrency_limit)
        .with_metrics(&metrics)?;

    let ctx = CollectorContext {
        gate: Arc::new(gate),
        metrics: Arc::clone(&metrics),
        settings: Arc::clone(&settings),
    };
    let scheduler = Arc::new(Scheduler::new(&collector::default_factories(), ctx)?);
    scheduler.start().await;

    let app = create_router(AppState {
        metrics,
        scheduler: Arc::clone(&scheduler),
        settings: Arc::clone(&settings),
    });

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!("Exporter listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (fatal_tx, fatal_rx) = tokio::sync::oneshot::channel();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&scheduler), fatal_tx))
        .await?;

    tracing::info!("Shutting down collectors...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!(error = %e, "Failed to shutdown collectors");
    }

    if let Ok(err) = fatal_rx.await {
        tracing::error!(
            collector = err.collector().unwrap_or("unknown"),
            category = %err.category(),
            error = %err,
            "Exiting after collector escalation"
        );
        return Err(err.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C, SIGTERM, or a collector escalation. An escalation is
/// handed back through `fatal` so `main` can exit non-zero.
async fn shutdown_signal(
    scheduler: Arc<Scheduler>,
    fatal: tokio::sync::oneshot::Sender<protect_exporter::CollectorError>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        Err(err) = scheduler.wait() => {
            // Receiver outlives the server.
            let _ = fatal.send(err);
        }
    }
}
