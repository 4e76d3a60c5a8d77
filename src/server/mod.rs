use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::context::ForensicContext;

pub mod routes;

/// Server state
pub struct AppState {
    pub ctx: Arc<ForensicContext>,
}

pub fn router(ctx: Arc<ForensicContext>) -> Router {
    let state = Arc::new(AppState { ctx });

    Router::new()
        .route("/stats", get(routes::get_stats))
        .route("/timeline", get(routes::list_timeline))
        .route("/timeline/{file}", get(routes::read_timeline))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(port: u16, ctx: Arc<ForensicContext>) -> anyhow::Result<()> {
    let app = router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on {}", addr);
    println!("🌍 Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
