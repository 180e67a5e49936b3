//! Transit incident aggregation service: ingests crowd-sourced reports,
//! applies a trust-gated decision pipeline, folds accepted reports into
//! per-location incidents, and republishes the live set as a
//! GTFS-Realtime feed.

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use transit_incidents::config::Config;
use transit_incidents::queue::{self, QueueSender};
use transit_incidents::routine::Routine;
use transit_incidents::store::Store;
use transit_incidents::http;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "transit_incidents=info,tower_http=info".into()))
        .json()
        .init();

    let config = Config::from_env();
    info!(db_path = %config.db_path, "starting transit incident service");

    let store = Store::connect(&config.db_path).await.unwrap_or_else(|e| {
        error!(error = %e, "failed to open store");
        std::process::exit(1);
    });

    let (queue_tx, queue_rx) = queue::channel();
    let queue_tx: Arc<dyn QueueSender> = Arc::new(queue_tx);

    let routine_store = store.clone();
    tokio::spawn(async move {
        Routine::new(routine_store).run(queue_rx).await;
    });

    let sweep_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match sweep_store.sweep_stale_incidents().await {
                Ok(n) if n > 0 => info!(resolved = n, "swept stale incidents"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "stale incident sweep failed"),
            }
        }
    });

    let state = http::AppState::new(queue_tx, store);
    let app = http::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new()),
    );

    let addr = config.socket_addr();
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        error!(error = %e, %addr, "failed to bind");
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "server error");
            std::process::exit(1);
        });
}
