use crate::{
    checker::{CheckerConfig, ResourceChecker, ticker::IntervalTicker},
    cluster::{ClusterApi, KubeCluster, ResourceKind},
    exporter::{CertExporter, Clock, SystemClock},
    metrics::Metrics,
};
use anyhow::{Context, Result, bail};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use std::{
    net::IpAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
};
use tokio::{net::TcpListener, signal, sync::watch, task::JoinSet};
use tracing::{error, info, warn};

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Install the ring provider as the process-wide rustls default, once
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
            warn!("rustls crypto provider already installed: {err:?}");
        }
    });
}

/// Everything the monitor needs, resolved from the command line
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub kubeconfig: Option<PathBuf>,
    pub listen: Option<IpAddr>,
    pub port: u16,
    pub metrics_path: String,
    pub secrets: CheckerConfig,
    pub config_maps: CheckerConfig,
}

/// Start the monitoring service
///
/// # Errors
///
/// Returns an error if no checker is enabled, the Kubernetes client cannot be
/// created, the listener cannot bind, or a checker stops unexpectedly
pub async fn start(settings: MonitorSettings) -> Result<()> {
    if !settings.secrets.is_enabled() && !settings.config_maps.is_enabled() {
        bail!(
            "nothing to monitor: set --secrets-include-glob and/or --configmaps-include-glob"
        );
    }

    ensure_crypto_provider();

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeCluster::connect(settings.kubeconfig.as_deref())
            .await
            .context("Failed to connect to Kubernetes")?,
    );

    let app = router(&settings.metrics_path, metrics.clone());
    let (listener, bind_addr) = bind(settings.listen, settings.port).await?;

    info!(
        "Listening on {bind_addr}, metrics path: {}",
        settings.metrics_path
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut checkers = JoinSet::new();

    for (kind, config) in [
        (ResourceKind::Secret, settings.secrets),
        (ResourceKind::ConfigMap, settings.config_maps),
    ] {
        if !config.is_enabled() {
            info!(kind = %kind, "Checker disabled, no include globs configured");
            continue;
        }

        let exporter = Arc::new(CertExporter::for_kind(kind, &metrics, clock.clone()));
        let checker = ResourceChecker::new(kind, config, cluster.clone(), exporter, metrics.clone());
        let shutdown = shutdown_rx.clone();

        checkers.spawn(async move {
            let mut ticker = IntervalTicker::new(checker.config().period);
            checker.run(&mut ticker, shutdown).await;
            kind
        });
    }

    let server = axum::serve(listener, app.into_make_service());

    // Race the HTTP server against the checkers and Ctrl-C
    tokio::select! {
        result = server => {
            result.context("HTTP server failed")?;
        }
        Some(result) = checkers.join_next() => {
            match result {
                Ok(kind) => {
                    error!(kind = %kind, "Checker exited unexpectedly");
                    bail!("{kind} checker stopped");
                }
                Err(e) => {
                    error!("Checker task panicked: {e}");
                    bail!("checker task panicked: {e}");
                }
            }
        }
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    // in-flight ticks run to completion
    let _ = shutdown_tx.send(true);
    while let Some(result) = checkers.join_next().await {
        if let Err(e) = result {
            error!("Checker task failed during shutdown: {e}");
        }
    }

    Ok(())
}

/// Router exposing the registry at `path`
#[must_use]
pub fn router(path: &str, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            buffer,
        ),
        Err(e) => {
            error!("{e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
                Vec::new(),
            )
        }
    }
}

/// Bind to `listen:port`, or try `[::]` first and fall back to `0.0.0.0`
async fn bind(listen: Option<IpAddr>, port: u16) -> Result<(TcpListener, String)> {
    if let Some(addr) = listen {
        let socket_addr = match addr {
            IpAddr::V4(v4) => format!("{v4}:{port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{port}"),
        };
        let listener = TcpListener::bind(&socket_addr)
            .await
            .with_context(|| format!("Failed to bind {socket_addr}"))?;
        return Ok((listener, socket_addr));
    }

    if let Ok(listener) = TcpListener::bind(format!("[::]:{port}")).await {
        return Ok((listener, format!("[::]:{port}")));
    }

    let socket_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&socket_addr)
        .await
        .with_context(|| format!("Failed to bind {socket_addr}"))?;

    Ok((listener, socket_addr))
}
