//! HTTP surface for the recording/autonomy flags
//!
//! Small REST companion to the link server, used by the operator UI:
//! - `GET /recording` — current recording flag
//! - `POST /recording` — flip the recording flag
//! - `GET /autonomy` — current autonomy flag
//! - `POST /autonomy` — set the autonomy flag from the `autonomy` field
//!
//! Pure flag reads/writes on the arbiter; no other side effects.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::arbiter::Arbiter;
use crate::protocol::truthy;

/// Bind and serve the flag API until the process exits.
pub async fn serve(bind: SocketAddr, arbiter: Arc<Arbiter>) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind control api to {}", bind))?;
    info!("control api listening on http://{}", listener.local_addr()?);
    serve_on(listener, arbiter).await
}

/// Serve the flag API on an already bound listener.
pub async fn serve_on(listener: TcpListener, arbiter: Arc<Arbiter>) -> Result<()> {
    axum::serve(listener, app(arbiter))
        .await
        .context("control api error")
}

fn app(arbiter: Arc<Arbiter>) -> Router {
    Router::new()
        .route("/recording", get(get_recording).post(toggle_recording))
        .route("/autonomy", get(get_autonomy).post(set_autonomy))
        .layer(CorsLayer::permissive())
        .with_state(arbiter)
}

async fn get_recording(State(arbiter): State<Arc<Arbiter>>) -> Json<Value> {
    Json(json!({ "recording": arbiter.recording_enabled() }))
}

async fn toggle_recording(State(arbiter): State<Arc<Arbiter>>) -> Json<Value> {
    let recording = arbiter.toggle_recording();
    info!(recording, "recording flag toggled");
    Json(json!({ "recording": recording }))
}

async fn get_autonomy(State(arbiter): State<Arc<Arbiter>>) -> Json<Value> {
    Json(json!({ "autonomy": arbiter.autonomy_enabled() }))
}

/// The `autonomy` field is interpreted with the same truthiness rules
/// as the heartbeat; a missing or null field is a client error.
async fn set_autonomy(
    State(arbiter): State<Arc<Arbiter>>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Ok(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid json body" })),
        );
    };
    match body.get("autonomy") {
        None | Some(Value::Null) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing autonomy value" })),
        ),
        Some(value) => {
            let enabled = truthy(value);
            arbiter.set_autonomy_enabled(enabled);
            info!(autonomy = enabled, "autonomy flag set");
            (StatusCode::OK, Json(json!({ "autonomy": enabled })))
        }
    }
}
