use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reviewpulse_common::Config;
use reviewpulse_store::{migrate, PgJobStore, PgTaskQueue};

mod rest;

use rest::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reviewpulse=info".parse()?))
        .init();

    let config = Config::api_from_env();

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await?;
    migrate(&pool).await?;

    let state = Arc::new(AppState {
        store: Arc::new(PgJobStore::new(pool.clone())),
        queue: Arc::new(PgTaskQueue::new(pool)),
    });

    let app = rest::router(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("ReviewPulse API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
