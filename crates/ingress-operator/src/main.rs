use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ingress_operator::config::{kube_client, OperatorConfig};
use ingress_operator::health::{run_health_server, HealthState};
use ingress_operator::metrics::Metrics;
use ingress_operator::{bootstrap, controller};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON formatted tracing for production
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("ingress-operator starting");

    let config = OperatorConfig::from_env().context("Failed to load configuration")?;

    info!(
        project = %config.project_name,
        resync_secs = config.resync.as_secs(),
        rate_wait_secs = config.rate_wait.as_secs(),
        resource_retries = config.resource_retries,
        "Loaded configuration"
    );

    let client = kube_client(&config)
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    bootstrap::ensure_crd_established(&client)
        .await
        .context("Failed to bootstrap the IngressConfig definition")?;

    let metrics =
        Arc::new(Metrics::new(&config.project_name).context("Failed to register metrics")?);

    let health_state = Arc::new(HealthState::new(metrics.clone()));
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    let cancel = CancellationToken::new();
    let ctx = controller::build_context(client.clone(), metrics, &config, cancel.clone());

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    select! {
        _ = controller::run(client, ctx, config.rate_wait) => {
            info!("controller stream ended");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
        }
    }

    // Abort pending retries and backoff sleeps.
    cancel.cancel();

    info!("Shutdown complete");
    Ok(())
}
