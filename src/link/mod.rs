//! Multiplexed link server: one WebSocket per logical channel
//!
//! The ground station opens one connection per channel against the same
//! bind address; the request path selects the channel:
//! - `WS /control` — operator input (inbound JSON)
//! - `WS /video` — live camera feed (outbound binary JPEG)
//! - `WS /telemetry` — status snapshots (outbound JSON)
//! - `WS /autonomy` — autonomy heartbeat (inbound JSON, liveness-checked)
//!
//! Any other path is accepted and immediately closed with code 1003.

pub mod registry;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::arbiter::Arbiter;
use crate::frame::CameraFrame;
use crate::telemetry::LinkMonitor;
use registry::ChannelRegistry;

/// Shared state handed to every channel handler.
pub struct LinkState {
    pub arbiter: Arc<Arbiter>,
    pub registry: Arc<ChannelRegistry>,
    /// Latest submitted camera frame; the video loop observes changes.
    pub frames: watch::Receiver<Option<Arc<CameraFrame>>>,
    pub monitor: Arc<dyn LinkMonitor>,
    pub telemetry_interval: Duration,
}

/// Bind and serve the link until the process exits.
pub async fn serve(bind: SocketAddr, state: Arc<LinkState>) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind link server to {}", bind))?;
    info!("link server listening on ws://{}", listener.local_addr()?);
    serve_on(listener, state).await
}

/// Serve the link on an already bound listener.
///
/// Split out from [`serve`] so tests can bind to an ephemeral port and
/// read the address back before the server starts.
pub async fn serve_on(listener: TcpListener, state: Arc<LinkState>) -> Result<()> {
    let app = Router::new()
        .route("/{channel}", get(channel_upgrade))
        .fallback(get(fallback_upgrade))
        .with_state(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("link server error")
}

async fn channel_upgrade(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<LinkState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| router::route(socket, channel, peer, state))
}

/// Paths with more than one segment cannot name a channel; accept the
/// upgrade so the client gets a proper close frame instead of an HTTP
/// error it may not surface.
async fn fallback_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<LinkState>>,
    uri: Uri,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    ws.on_upgrade(move |socket| router::route(socket, path, peer, state))
}
