mod config;
mod data;
mod engine;
mod errors;
mod optimizer;
mod server;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Structured logging, env-filterable (RUST_LOG=debug for candidate traces)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tracing::info!("rusty_condor engine starting");

    let cfg = match config::EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    if cfg.use_mock_data {
        tracing::warn!("serving synthetic chain data (USE_MOCK_DATA=true)");
    }

    let port = cfg.server_port;
    let app_state = AppState::new(cfg);

    let app = axum::Router::new()
        .route("/api/optimize", axum::routing::post(server::routes::post_optimize))
        .route("/api/greeks", axum::routing::post(server::routes::post_greeks))
        .route("/api/montecarlo", axum::routing::post(server::routes::post_montecarlo))
        .route("/api/stress", axum::routing::post(server::routes::post_stress))
        .route("/api/chain", axum::routing::get(server::routes::get_chain))
        .route("/api/counters", axum::routing::get(server::routes::get_counters))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
