use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;

use dilemma_backend::api;
use dilemma_backend::config::Config;
use dilemma_backend::db::Database;
use dilemma_backend::engine::sandbox::{Sandbox, SandboxConfig};
use dilemma_backend::metrics;
use dilemma_backend::scheduler;
use dilemma_backend::worker_pool::WorkerPool;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let config = Config::load();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let pool = Arc::new(WorkerPool::new(config.match_workers));
    let sandbox = Sandbox::new(SandboxConfig {
        decide_timeout: Duration::from_millis(config.decide_timeout_ms),
    });

    if config.scheduler_enabled {
        let dev_interval = config.scheduler_dev_interval_secs.map(Duration::from_secs);
        let _ = scheduler::spawn_scheduler(db.clone(), pool.clone(), sandbox.clone(), dev_interval);
    }

    let app = api::router(db, pool, sandbox).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Dilemma backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
