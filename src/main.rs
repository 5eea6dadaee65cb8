//! Nurse Scheduling - Axum Server
//!
//! Run with: cargo run
//! Then open: http://localhost:7860

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

use nurse_scheduling::api;
use nurse_scheduling::config::AppConfig;
use nurse_scheduling::console;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nurse_scheduling=info".parse().unwrap()))
        .init();

    let config = AppConfig::load_or_default().unwrap();
    console::print_banner();

    let state = Arc::new(api::AppState::from_config(&config));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = api::router(state);
    if PathBuf::from(&config.server.static_dir).exists() {
        app = app.fallback_service(ServeDir::new(&config.server.static_dir));
    }
    let app = app.layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    println!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
