//! Per-channel connection handlers
//!
//! Each accepted WebSocket is classified by its request path, installed
//! into the channel registry, then owned by one handler loop until the
//! socket closes or a newer connection supersedes it. Handlers never
//! mutate shared state after losing slot ownership.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::arbiter::ControlSource;
use crate::link::registry::{Attached, ConnectionState};
use crate::link::LinkState;
use crate::protocol::{
    autonomy_engaged, ChannelKind, ControlInput, ErrorReply, CLOSE_SUPERSEDED,
    CLOSE_UNKNOWN_CHANNEL, REASON_SUPERSEDED, REASON_UNKNOWN_CHANNEL,
};
use crate::telemetry;

type WsSink = SplitSink<WebSocket, Message>;

/// Classify a freshly upgraded socket and run its channel loop.
pub(crate) async fn route(
    socket: WebSocket,
    target: String,
    peer: SocketAddr,
    state: Arc<LinkState>,
) {
    let Some(kind) = ChannelKind::from_target(&target) else {
        warn!(%peer, target, "closing connection to unknown channel");
        close_unknown(socket).await;
        return;
    };

    info!(channel = %kind, %peer, "channel client connected");
    let Attached {
        generation,
        close_rx,
    } = state.registry.attach(kind).await;

    match kind {
        ChannelKind::Control => control_loop(socket, close_rx, generation, &state).await,
        ChannelKind::Video => video_loop(socket, close_rx, &state).await,
        ChannelKind::Telemetry => telemetry_loop(socket, close_rx, &state).await,
        ChannelKind::Autonomy => autonomy_loop(socket, close_rx, generation, &state).await,
    }

    if state.registry.detach(kind, generation).await {
        info!(channel = %kind, %peer, "channel client disconnected");
    }
}

async fn close_unknown(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: CLOSE_UNKNOWN_CHANNEL,
        reason: REASON_UNKNOWN_CHANNEL.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Clean close sent to a handler that lost its slot to a newer connection.
async fn send_superseded(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CLOSE_SUPERSEDED,
        reason: REASON_SUPERSEDED.into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

/// Inbound operator samples. Parse failures are answered on the same
/// connection and do not end it; transport errors do.
async fn control_loop(
    socket: WebSocket,
    mut close_rx: mpsc::Receiver<()>,
    generation: u64,
    state: &LinkState,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                send_superseded(&mut sink).await;
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        control_message(text.as_bytes(), &mut sink, generation, state).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        control_message(&data, &mut sink, generation, state).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "control transport error");
                        break;
                    }
                }
            }
        }
    }
}

async fn control_message(raw: &[u8], sink: &mut WsSink, generation: u64, state: &LinkState) {
    match serde_json::from_slice::<ControlInput>(raw) {
        Ok(input) => {
            // A superseded handler may still be draining its socket;
            // only the slot owner feeds the arbiter.
            if state.registry.owns(ChannelKind::Control, generation).await {
                state.arbiter.update_user_input(input.throttle, input.angle);
            }
        }
        Err(e) => {
            warn!(error = %e, "malformed control message");
            let reply = ErrorReply {
                error: e.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = sink.send(Message::Text(json.into())).await;
            }
        }
    }
}

/// Heartbeat receiver with a liveness bound. Data messages re-arm the
/// bound; silence past it marks the slot disconnected and forces the
/// autonomous source (when not already active), so a dead autonomy
/// link can never leave a stale operator claim in place.
async fn autonomy_loop(
    socket: WebSocket,
    mut close_rx: mpsc::Receiver<()>,
    generation: u64,
    state: &LinkState,
) {
    let (mut sink, mut stream) = socket.split();
    let liveness = state.arbiter.autonomy_liveness();
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                send_superseded(&mut sink).await;
                break;
            }
            _ = sleep_until(deadline) => {
                deadline = Instant::now() + liveness;
                if !state.registry.owns(ChannelKind::Autonomy, generation).await {
                    continue;
                }
                state
                    .registry
                    .set_state(ChannelKind::Autonomy, generation, ConnectionState::Disconnected)
                    .await;
                if state.arbiter.current_source() != ControlSource::Autonomous {
                    state.arbiter.set_source(ControlSource::Autonomous);
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + liveness;
                        autonomy_message(text.as_bytes(), generation, state).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        deadline = Instant::now() + liveness;
                        autonomy_message(&data, generation, state).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "autonomy transport error");
                        break;
                    }
                }
            }
        }
    }
}

async fn autonomy_message(raw: &[u8], generation: u64, state: &LinkState) {
    if !state.registry.owns(ChannelKind::Autonomy, generation).await {
        return;
    }
    state
        .registry
        .set_state(ChannelKind::Autonomy, generation, ConnectionState::Connected)
        .await;

    match serde_json::from_slice::<Value>(raw) {
        Ok(msg) => {
            if autonomy_engaged(&msg) {
                state.arbiter.set_source(ControlSource::Autonomous);
            } else {
                state.arbiter.set_source(ControlSource::User);
            }
        }
        // Malformed heartbeats are dropped; the liveness bound still
        // counts them as activity.
        Err(e) => warn!(error = %e, "malformed autonomy message"),
    }
}

/// Push loop: observes the frame watch channel and sends one binary
/// JPEG per observed frame. Frames submitted while an encode or send is
/// in flight replace the pending value, so the client always gets the
/// newest frame and never a backlog.
async fn video_loop(socket: WebSocket, mut close_rx: mpsc::Receiver<()>, state: &LinkState) {
    let (mut sink, mut stream) = socket.split();
    let mut frames = state.frames.clone();
    // Frames submitted before this client attached are not delivered
    frames.mark_unchanged();

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                send_superseded(&mut sink).await;
                break;
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    // Frame source is gone; nothing further to push
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                let Some(frame) = frame else { continue };
                match tokio::task::spawn_blocking(move || frame.encode_jpeg()).await {
                    Ok(Ok(jpeg)) => {
                        if sink.send(Message::Binary(jpeg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "frame encode failed"),
                    Err(e) => warn!(error = %e, "frame encode task failed"),
                }
            }
            msg = stream.next() => {
                if !pump_client_messages(&mut sink, msg).await {
                    break;
                }
            }
        }
    }
}

/// Push loop: one snapshot per interval while connected. The wireless
/// sample runs on the blocking pool; send failure ends the loop.
async fn telemetry_loop(socket: WebSocket, mut close_rx: mpsc::Receiver<()>, state: &LinkState) {
    let (mut sink, mut stream) = socket.split();
    let mut ticker = interval(state.telemetry_interval);

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                send_superseded(&mut sink).await;
                break;
            }
            _ = ticker.tick() => {
                let monitor = state.monitor.clone();
                let link = tokio::task::spawn_blocking(move || monitor.sample())
                    .await
                    .unwrap_or_default();
                let snapshot = telemetry::snapshot(&state.arbiter, &state.registry, link).await;
                match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "telemetry snapshot serialize failed"),
                }
            }
            msg = stream.next() => {
                if !pump_client_messages(&mut sink, msg).await {
                    break;
                }
            }
        }
    }
}

/// Inbound handling for push-only channels: answer pings, ignore data,
/// stop on close or transport error. Returns whether to keep running.
async fn pump_client_messages(
    sink: &mut WsSink,
    msg: Option<Result<Message, axum::Error>>,
) -> bool {
    match msg {
        Some(Ok(Message::Ping(data))) => {
            let _ = sink.send(Message::Pong(data)).await;
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            debug!(error = %e, "transport error");
            false
        }
    }
}
