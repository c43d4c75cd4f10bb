use std::sync::Arc;

use curator::config::Config;
use curator::ops::{DeleteHandler, RenameHandler};
use curator::tasks::routes::task_routes;
use curator::tasks::store::TaskStore;
use curator::tasks::ws::stream_routes;
use curator::worker::{HandlerRegistry, WorkerPool};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();

    eprintln!("📼 curator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Task API:    http://{}/tasks", config.bind_addr);
    eprintln!("   Task stream: ws://{}/ws/tasks", config.bind_addr);
    eprintln!("   Workers: {}\n", config.workers);

    // ── Task store ───────────────────────────────────────────────────────
    let store = TaskStore::with_capacity(config.broadcast_capacity);

    // ── Operation handlers ───────────────────────────────────────────────
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register_sync(Arc::new(RenameHandler::new()));
    handlers.register_sync(Arc::new(DeleteHandler));
    eprintln!("   Handlers: {} registered", handlers.count());

    // ── Worker pool ──────────────────────────────────────────────────────
    let pool = WorkerPool::spawn(
        Arc::clone(&store),
        Arc::clone(&handlers),
        config.workers,
        config.claim_poll_interval,
    );

    // ── HTTP / WebSocket server ──────────────────────────────────────────
    let app = task_routes(Arc::clone(&store))
        .merge(stream_routes(Arc::clone(&store)))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Let in-flight items finish; unclaimed tasks stay queued and are not
    // recovered across restarts.
    pool.shutdown().await;

    Ok(())
}
