//! rtorrent-exporter — Prometheus exporter for rTorrent.
//!
//! Binds a downloads collector to an HTTP scrape endpoint. Every request to
//! the metrics path triggers one synchronous scrape of the rTorrent XML-RPC
//! interface; the blocking work runs off the async worker threads.

mod metrics;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use clap::Parser;
use prometheus_client::encoding::text;
use prometheus_client::registry::Registry;
use tracing::{error, info};

use rtorrent_exporter_core::client::{ClientOpts, RtorrentClient};
use rtorrent_exporter_core::collector::{CollectorOpts, DownloadsCollector};

use metrics::DownloadsMetrics;

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "rtorrent-exporter",
    about = "Prometheus exporter for rTorrent",
    version = rtorrent_exporter_core::VERSION
)]
struct Args {
    /// host:port for the exporter's scrape endpoint.
    #[arg(long, default_value = "0.0.0.0:9135", env = "TELEMETRY_ADDR")]
    telemetry_addr: String,

    /// URL path for surfacing collected metrics.
    #[arg(long, default_value = "/metrics")]
    telemetry_path: String,

    /// URL of the rTorrent XML-RPC endpoint, e.g. http://localhost/RPC2.
    #[arg(long, env = "RTORRENT_ADDR")]
    rtorrent_addr: String,

    /// Username for HTTP Basic authentication with the rTorrent endpoint.
    /// Authentication is enabled when both username and password are set.
    #[arg(long, env = "RTORRENT_USERNAME")]
    rtorrent_username: Option<String>,

    /// Password for HTTP Basic authentication with the rTorrent endpoint.
    #[arg(long, env = "RTORRENT_PASSWORD")]
    rtorrent_password: Option<String>,

    /// Allow XML-RPC over TLS with a certificate that fails verification.
    #[arg(long)]
    rtorrent_insecure: bool,

    /// rTorrent request timeout in seconds.
    #[arg(long, default_value = "10")]
    rtorrent_timeout: u64,

    /// Collect rate and total bytes for each torrent
    /// (greatly increases metric cardinality).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    collect_active: bool,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtorrent_exporter=info".parse().unwrap()),
        )
        .init();

    if args.rtorrent_timeout == 0 {
        error!("timeout for rTorrent requests must be greater than 0");
        process::exit(1);
    }
    if !args.telemetry_path.starts_with('/') {
        error!(path = %args.telemetry_path, "telemetry path must start with '/'");
        process::exit(1);
    }

    let auth_enabled =
        args.rtorrent_username.is_some() && args.rtorrent_password.is_some();

    // The blocking client owns its own I/O driver and must be built before
    // the async runtime starts.
    let client = match RtorrentClient::new(
        &args.rtorrent_addr,
        ClientOpts {
            username: args.rtorrent_username.clone(),
            password: args.rtorrent_password.clone(),
            timeout: Duration::from_secs(args.rtorrent_timeout),
            insecure: args.rtorrent_insecure,
        },
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "cannot create rTorrent client");
            process::exit(1);
        }
    };

    let collector = DownloadsCollector::new(
        client,
        CollectorOpts {
            download_details: args.collect_active,
        },
    );

    let mut registry = Registry::default();
    registry.register_collector(Box::new(DownloadsMetrics::new(collector)));

    info!(
        version = rtorrent_exporter_core::VERSION,
        addr = %args.telemetry_addr,
        server = %args.rtorrent_addr,
        authentication = auth_enabled,
        insecure = args.rtorrent_insecure,
        timeout_secs = args.rtorrent_timeout,
        collect_active = args.collect_active,
        "starting rTorrent exporter"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(serve(args, registry));
}

async fn serve(args: Args, registry: Registry) {
    let registry = Arc::new(registry);
    let metrics_path = args.telemetry_path.clone();

    let app = Router::new()
        .route(&args.telemetry_path, get(handle_metrics))
        .route(
            "/",
            get(move || async move { Redirect::permanent(&metrics_path) }),
        )
        .with_state(registry);

    let listener = match tokio::net::TcpListener::bind(&args.telemetry_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %args.telemetry_addr, error = %e, "cannot bind telemetry address");
            process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "cannot start rTorrent exporter");
        process::exit(1);
    }
}

/// Runs one scrape and renders the registry in OpenMetrics text format.
///
/// Encoding drives the collector, which performs blocking XML-RPC calls, so
/// the whole scrape runs on the blocking thread pool.
async fn handle_metrics(State(registry): State<Arc<Registry>>) -> Response {
    let encoded = tokio::task::spawn_blocking(move || {
        let mut buffer = String::new();
        text::encode(&mut buffer, &registry).map(|_| buffer)
    })
    .await;

    match encoded {
        Ok(Ok(body)) => (
            [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed encoding metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "metrics scrape task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
