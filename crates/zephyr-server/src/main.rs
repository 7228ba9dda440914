use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use zephyr_gateway::connection;
use zephyr_gateway::coordinator::{Coordinator, CoordinatorHandle};
use zephyr_store::{Gateway, worker};

/// Interval between periodic full-state snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zephyr=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("ZEPHYR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ZEPHYR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path = std::env::var("ZEPHYR_DB_PATH").unwrap_or_else(|_| "zephyr.db".into());
    let snapshot_path =
        std::env::var("ZEPHYR_SNAPSHOT_PATH").unwrap_or_else(|_| "zephyr-snapshot.json".into());

    // Persistence gateway + background worker
    let gateway = Arc::new(Gateway::open(
        &PathBuf::from(&db_path),
        &PathBuf::from(&snapshot_path),
    ));
    let state = gateway.load_all();
    let persist = worker::spawn(gateway);

    // Coordinator actor owning all shared state
    let mut coordinator = Coordinator::new(persist);
    coordinator.seed(state);
    let handle = coordinator.spawn();

    // Periodic snapshots
    let snapshot_handle = handle.clone();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SNAPSHOT_INTERVAL);
        timer.tick().await; // the first tick fires immediately
        loop {
            timer.tick().await;
            snapshot_handle.snapshot();
        }
    });

    // Routes
    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(handle.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Zephyr relay listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down; flushing final snapshot");
    handle.shutdown().await;

    Ok(())
}

async fn ws_upgrade(
    State(coordinator): State<CoordinatorHandle>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, coordinator))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
