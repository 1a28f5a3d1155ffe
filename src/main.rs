use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use gcplog::{Config, GcpLog, GcpLogLayer};
use tokio::signal;
use tracing::info;

mod api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    init_tracing();

    let config_path = std::env::var("GCPLOG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("gcplog.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Missing identifiers or credentials are fatal: refuse to start rather
    // than run without request logs.
    let logger = GcpLog::builder(&config.logging)
        .user(|req| req.header("x-user-id").map(str::to_owned))
        .build()
        .context("Failed to initialise gcplog")?;

    info!(
        port = config.server.port,
        project_id = %config.logging.project_id,
        service = %config.logging.service_name,
        production = logger.is_production(),
        "gcplog-demo starting"
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    // Outermost last: the request ID is assigned before gcplog sees the request.
    let app = api::demo::router(logger.clone())
        .layer(GcpLogLayer::new(logger.clone()))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("draining log deliveries");
    logger.close().await;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gcplog=info,gcplog_demo=info,tower_http=warn".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "ctrl-c",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "shutdown signal received");
}

/// `gcplog-demo --healthcheck`: probe the local `/healthz` and exit with 0 on
/// success, 1 otherwise. Port comes from `GCPLOG_PORT` (default 8080).
async fn healthcheck() -> anyhow::Result<()> {
    let port: u16 = match std::env::var("GCPLOG_PORT") {
        Ok(raw) => raw.parse().context("GCPLOG_PORT is not a port number")?,
        Err(_) => 8080,
    };

    let healthy = reqwest::get(format!("http://127.0.0.1:{port}/healthz"))
        .await
        .is_ok_and(|resp| resp.status().is_success());
    std::process::exit(if healthy { 0 } else { 1 });
}
