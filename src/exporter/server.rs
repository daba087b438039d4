use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{health, metrics},
    state::ExporterState,
};

pub fn router(state: ExporterState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the exporter on an already bound listener until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    state: ExporterState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!(%address, "Metrics exporter listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Metrics exporter stopped");
    Ok(())
}
