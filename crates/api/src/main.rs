use std::net::SocketAddr;

use onenet_core::Settings;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod middleware;
mod routes;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let settings = Settings::from_env();
    let addr: SocketAddr = settings.bind_addr().parse()?;

    if !settings.strict_tls {
        warn!("strict TLS disabled: upstream certificate failures fall back to an unverified retry");
    }

    info!(
        %addr,
        upstream = %settings.upstream_url,
        strict_tls = settings.strict_tls,
        static_dir = %settings.static_dir,
        "starting onenet proxy"
    );
    info!(frontend = %format!("http://localhost:{}/index.html", settings.port), "frontend");
    for (method, path) in [
        ("GET", "/api/health"),
        ("POST", "/api/onenet/connect"),
        ("POST", "/api/onenet/token"),
        ("POST", "/api/onenet/send-data"),
    ] {
        info!(method, path, "endpoint available");
    }

    let state = AppState::new(settings)?;
    let app = routes::app(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("onenet proxy stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
