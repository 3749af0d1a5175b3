use std::future::IntoFuture as _;

use anyhow::anyhow;
use bookstore_operator::{
    config::OperatorConfig,
    operator::{self, State},
    telemetry,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();
    telemetry::init().await?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let listen = config.listen;
    let controller = operator::BookController::new(state.clone(), config);

    // Start web server
    let listener = TcpListener::bind(listen).await?;
    info!("serving metrics and diagnostics on {listen}");
    let router = handlers::router();
    let server = axum::serve(listener, router.with_state(state));

    // Run both the http server and the controller; the controller stops on SIGTERM/SIGINT
    tokio::select! {
        c = controller.run() => {
            c?;
            info!("controller shut down");
            Ok(())
        },
        s = server.into_future() => {
            s?;
            Err(anyhow!("server exited early"))
        }
    }
}

/// Handlers for the web server portion of the operator
mod handlers {
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing, Json, Router};
    use prometheus::{Encoder, TextEncoder};
    use tracing::warn;

    use bookstore_operator::operator::State as OperatorState;

    /// Construct the router for all the handlers
    pub fn router() -> Router<OperatorState> {
        Router::new()
            .route("/metrics", routing::get(metrics))
            .route("/health", routing::get(health))
            .route("/", routing::get(index))
    }

    /// Handler for exposing prometheus metrics
    async fn metrics(State(state): State<OperatorState>) -> impl IntoResponse {
        let metrics = state.metrics();
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metrics, &mut buffer) {
            warn!("failed to encode metrics: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
        }

        (StatusCode::OK, buffer)
    }

    /// Handler for checking the health of the server
    async fn health() -> impl IntoResponse {
        (StatusCode::OK, Json("healthy"))
    }

    /// Handler for interacting with the operator
    async fn index(State(state): State<OperatorState>) -> impl IntoResponse {
        let diagnostics = state.diagnostics().await;

        (StatusCode::OK, Json(diagnostics))
    }
}
