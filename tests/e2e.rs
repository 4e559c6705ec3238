//! E2E regression suite for the drover link
//!
//! Binds real TCP listeners on ephemeral ports (no hardware, no radio)
//! and exercises the full path:
//!
//! - Operator/autonomy WebSocket clients → link server → arbiter → drive tick
//! - Drive tick → frame watch → video channel → WebSocket client
//! - Flag API over HTTP
//!
//! Run: `cargo test --test e2e`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use drover::link;
use drover::link::registry::ConnectionState;
use drover::telemetry::{LinkStatus, StaticLinkMonitor, TelemetrySnapshot};
use drover::web;
use drover::{CameraFrame, ChannelKind, Config, ControlSource, NullMarkerDetector, TeleopCore};

// ── Shared helpers ───────────────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Stack {
    core: Arc<TeleopCore>,
    link_addr: SocketAddr,
    api_addr: SocketAddr,
}

async fn start_stack() -> Stack {
    start_stack_with(Config::default()).await
}

/// Start the link server and flag API on ephemeral ports.
async fn start_stack_with(mut config: Config) -> Stack {
    let link_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let link_addr = link_listener.local_addr().unwrap();
    let api_addr = api_listener.local_addr().unwrap();
    config.link_bind = link_addr;
    config.api_bind = api_addr;

    let status = LinkStatus {
        ap_mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
        signal_strength: Some(-52.0),
    };
    let core = Arc::new(
        TeleopCore::new(
            config,
            Arc::new(NullMarkerDetector),
            Arc::new(StaticLinkMonitor(status)),
        )
        .unwrap(),
    );

    let state = core.link_state();
    tokio::spawn(async move {
        link::serve_on(link_listener, state).await.unwrap();
    });
    let arbiter = core.arbiter();
    tokio::spawn(async move {
        web::serve_on(api_listener, arbiter).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    Stack {
        core,
        link_addr,
        api_addr,
    }
}

/// Connect a WebSocket client to one channel.
async fn connect(addr: SocketAddr, channel: &str) -> WsStream {
    let url = format!("ws://{}/{}", addr, channel);
    let (stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    stream
}

/// Poll a condition every 10ms until it holds or 2s elapse.
async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a close frame, skipping data messages.
async fn next_close(ws: &mut WsStream, timeout: Duration) -> Option<CloseFrame> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => return frame,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

/// Wait for the next text message, skipping everything else.
async fn next_text(ws: &mut WsStream, timeout: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(data)))) => return Some(data.as_str().to_string()),
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return None,
        }
    }
}

/// Collect binary messages until timeout.
async fn collect_binary(ws: &mut WsStream, timeout: Duration) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => messages.push(data.to_vec()),
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
        }
    }
    messages
}

fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> CameraFrame {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..width * height {
        rgb.extend_from_slice(&color);
    }
    CameraFrame::new(width, height, rgb).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
// Channel routing
// ═══════════════════════════════════════════════════════════════════════

/// Unknown paths are refused with the policy close code, not an HTTP error.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_channel_is_closed_with_1003() {
    let stack = start_stack().await;

    let mut ws = connect(stack.link_addr, "uplink").await;
    let frame = next_close(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected a close frame");
    assert_eq!(frame.code, CloseCode::from(1003));
    assert_eq!(frame.reason.as_str(), "unknown channel");

    // Multi-segment paths take the fallback route to the same refusal.
    let mut ws = connect(stack.link_addr, "video/extra").await;
    let frame = next_close(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected a close frame");
    assert_eq!(frame.code, CloseCode::from(1003));
}

/// A newer connection on the same channel displaces the older one.
#[tokio::test(flavor = "multi_thread")]
async fn newer_control_client_supersedes_older() {
    let stack = start_stack().await;
    stack.core.arbiter().set_autonomy_enabled(true);

    let mut first = connect(stack.link_addr, "control").await;
    first
        .send(Message::text(r#"{"throttle": 0.2, "angle": 0.0}"#))
        .await
        .unwrap();
    wait_for("first client's input", || {
        stack.core.on_tick(None).throttle == 0.2
    })
    .await;

    let mut second = connect(stack.link_addr, "control").await;
    let frame = next_close(&mut first, Duration::from_secs(2))
        .await
        .expect("superseded client should be closed");
    assert_eq!(frame.code, CloseCode::from(1000));
    assert_eq!(frame.reason.as_str(), "superseded");

    second
        .send(Message::text(r#"{"throttle": 0.7, "angle": 0.1}"#))
        .await
        .unwrap();
    wait_for("second client's input", || {
        stack.core.on_tick(None).throttle == 0.7
    })
    .await;
}

/// A burst of simultaneous connects settles on exactly one owner.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_control_clients_leave_one_owner() {
    let stack = start_stack().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let addr = stack.link_addr;
        tasks.push(tokio::spawn(async move { connect(addr, "control").await }));
    }
    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    let mut closed = 0;
    let mut survivors = 0;
    for mut ws in clients {
        match next_close(&mut ws, Duration::from_millis(700)).await {
            Some(frame) => {
                assert_eq!(frame.code, CloseCode::from(1000));
                assert_eq!(frame.reason.as_str(), "superseded");
                closed += 1;
            }
            None => survivors += 1,
        }
    }
    assert_eq!(closed, 7, "all but the final owner should be displaced");
    assert_eq!(survivors, 1);
    assert!(stack.core.registry().attached(ChannelKind::Control).await);
}

// ═══════════════════════════════════════════════════════════════════════
// Control and autonomy channels
// ═══════════════════════════════════════════════════════════════════════

/// Operator input flows from the socket into the drive tick.
#[tokio::test(flavor = "multi_thread")]
async fn control_input_drives_the_arbiter() {
    let stack = start_stack().await;
    stack.core.arbiter().set_autonomy_enabled(true);

    let mut ws = connect(stack.link_addr, "control").await;
    ws.send(Message::text(r#"{"throttle": 0.5, "angle": -0.2}"#))
        .await
        .unwrap();

    wait_for("control input to reach the arbiter", || {
        let out = stack.core.on_tick(None);
        out.mode == ControlSource::User && out.throttle == 0.5 && out.angle == -0.2
    })
    .await;

    ws.close(None).await.ok();
}

/// Malformed control input gets an error reply and the link stays up.
#[tokio::test(flavor = "multi_thread")]
async fn malformed_control_receives_error_reply() {
    let stack = start_stack().await;
    stack.core.arbiter().set_autonomy_enabled(true);

    let mut ws = connect(stack.link_addr, "control").await;
    ws.send(Message::text("steady on")).await.unwrap();

    let reply = next_text(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected an error reply");
    let json: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert!(json.get("error").is_some(), "reply should carry an error field");

    // The same connection still carries valid input afterwards.
    ws.send(Message::text(r#"{"throttle": 0.4, "angle": 0.0}"#))
        .await
        .unwrap();
    wait_for("valid input after the error", || {
        stack.core.on_tick(None).throttle == 0.4
    })
    .await;
}

/// Operator input that stops arriving decays to neutral output.
#[tokio::test(flavor = "multi_thread")]
async fn stale_operator_input_returns_to_neutral() {
    let mut config = Config::default();
    config.user_timeout = Duration::from_millis(100);
    let stack = start_stack_with(config).await;
    stack.core.arbiter().set_autonomy_enabled(true);

    let mut ws = connect(stack.link_addr, "control").await;
    ws.send(Message::text(r#"{"throttle": 0.6, "angle": 0.3}"#))
        .await
        .unwrap();
    wait_for("input to land", || stack.core.on_tick(None).throttle == 0.6).await;

    ws.close(None).await.ok();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let out = stack.core.on_tick(None);
    assert_eq!(out.mode, ControlSource::User);
    assert_eq!(out.throttle, 0.0);
    assert_eq!(out.angle, 0.0);
}

/// Heartbeats on the autonomy channel switch the active source.
#[tokio::test(flavor = "multi_thread")]
async fn autonomy_heartbeat_switches_the_source() {
    let stack = start_stack().await;
    let arbiter = stack.core.arbiter();
    assert_eq!(arbiter.current_source(), ControlSource::User);

    let mut ws = connect(stack.link_addr, "autonomy").await;
    ws.send(Message::text(r#"{"autonomy": true}"#)).await.unwrap();
    wait_for("autonomous takeover", || {
        arbiter.current_source() == ControlSource::Autonomous
    })
    .await;

    ws.send(Message::text(r#"{"autonomy": false}"#))
        .await
        .unwrap();
    wait_for("handback to the operator", || {
        arbiter.current_source() == ControlSource::User
    })
    .await;
}

/// A garbled heartbeat is dropped without dropping the connection.
#[tokio::test(flavor = "multi_thread")]
async fn malformed_autonomy_heartbeat_keeps_the_link() {
    let stack = start_stack().await;

    let mut ws = connect(stack.link_addr, "autonomy").await;
    ws.send(Message::text("][")).await.unwrap();
    ws.send(Message::text(r#"{"autonomy": true}"#)).await.unwrap();

    wait_for("takeover after the malformed heartbeat", || {
        stack.core.arbiter().current_source() == ControlSource::Autonomous
    })
    .await;
}

/// A silent autonomy link is declared dead and the vehicle falls back
/// to autonomous control.
#[tokio::test(flavor = "multi_thread")]
async fn silent_autonomy_link_forces_autonomous_source() {
    let mut config = Config::default();
    config.autonomy_liveness = Duration::from_millis(100);
    let stack = start_stack_with(config).await;
    let arbiter = stack.core.arbiter();

    let mut ws = connect(stack.link_addr, "autonomy").await;
    ws.send(Message::text(r#"{"autonomy": true}"#)).await.unwrap();
    wait_for("takeover", || {
        arbiter.current_source() == ControlSource::Autonomous
    })
    .await;
    ws.send(Message::text(r#"{"autonomy": false}"#))
        .await
        .unwrap();
    wait_for("handback", || {
        arbiter.current_source() == ControlSource::User
    })
    .await;

    // No further heartbeats: the liveness bound trips on its own.
    wait_for("liveness fallback", || {
        arbiter.current_source() == ControlSource::Autonomous
    })
    .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let state = stack.core.registry().state(ChannelKind::Autonomy).await;
        if state == ConnectionState::Disconnected {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("autonomy slot never marked disconnected");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Video and telemetry channels
// ═══════════════════════════════════════════════════════════════════════

/// Submitted frames reach the video client as complete JPEGs.
#[tokio::test(flavor = "multi_thread")]
async fn video_channel_streams_jpeg_frames() {
    let stack = start_stack().await;
    let mut ws = connect(stack.link_addr, "video").await;

    // Frames submitted before the handler attaches are dropped, so keep
    // submitting until one comes back.
    let mut received: Option<Vec<u8>> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while received.is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no video frame within 5s"
        );
        stack.core.submit_frame(solid_frame(80, 60, [200, 40, 40]));
        if let Ok(Some(Ok(Message::Binary(data)))) =
            tokio::time::timeout(Duration::from_millis(100), ws.next()).await
        {
            received = Some(data.to_vec());
        }
    }

    let jpeg = received.unwrap();
    assert_eq!(&jpeg[..2], &[0xff, 0xd8], "JPEG SOI marker");
    assert_eq!(&jpeg[jpeg.len() - 2..], &[0xff, 0xd9], "JPEG EOI marker");
}

/// A frame submitted before the client attached is not replayed to it.
#[tokio::test(flavor = "multi_thread")]
async fn stale_frame_is_not_replayed_to_a_new_client() {
    let stack = start_stack().await;
    stack.core.submit_frame(solid_frame(80, 60, [10, 200, 10]));

    let mut ws = connect(stack.link_addr, "video").await;
    let early = collect_binary(&mut ws, Duration::from_millis(400)).await;
    assert!(early.is_empty(), "stale frame should not be replayed");

    // Fresh frames flow normally afterwards.
    let mut received = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !received {
        assert!(
            tokio::time::Instant::now() < deadline,
            "fresh frame never arrived"
        );
        stack.core.submit_frame(solid_frame(80, 60, [10, 10, 200]));
        if let Ok(Some(Ok(Message::Binary(_)))) =
            tokio::time::timeout(Duration::from_millis(100), ws.next()).await
        {
            received = true;
        }
    }
}

/// Telemetry snapshots reflect the wireless sample, the arbitration
/// mode string, and control channel liveness.
#[tokio::test(flavor = "multi_thread")]
async fn telemetry_reports_link_and_arbitration_state() {
    let mut config = Config::default();
    config.telemetry_interval = Duration::from_millis(100);
    let stack = start_stack_with(config).await;

    let mut ws = connect(stack.link_addr, "telemetry").await;
    let text = next_text(&mut ws, Duration::from_secs(2))
        .await
        .expect("first telemetry snapshot");
    let snap: TelemetrySnapshot = serde_json::from_str(&text).unwrap();
    assert_eq!(snap.ap_mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    assert_eq!(snap.signal_strength, Some(-52.0));
    // Autonomy flag starts lowered, which resolves to the autonomous mode string.
    assert_eq!(snap.user_mode, "local_angle");
    assert!(!snap.back_connection);

    stack.core.arbiter().set_autonomy_enabled(true);
    let _control = connect(stack.link_addr, "control").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let text = next_text(&mut ws, Duration::from_secs(1))
            .await
            .expect("telemetry stream should stay live");
        let snap: TelemetrySnapshot = serde_json::from_str(&text).unwrap();
        if snap.user_mode == "user" && snap.back_connection {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "telemetry never reflected the control client"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Flag API
// ═══════════════════════════════════════════════════════════════════════

/// Both flags round-trip over HTTP, and a body without the autonomy
/// field is a client error that leaves the flag untouched.
#[tokio::test(flavor = "multi_thread")]
async fn flag_api_round_trip() {
    let stack = start_stack().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", stack.api_addr);

    let resp: serde_json::Value = client
        .get(format!("{base}/recording"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["recording"], false);

    let resp: serde_json::Value = client
        .post(format!("{base}/recording"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["recording"], true);
    assert!(stack.core.arbiter().recording_enabled());

    let resp = client
        .post(format!("{base}/autonomy"))
        .json(&serde_json::json!({ "autonomy": "engaged" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["autonomy"], true);
    assert!(stack.core.arbiter().autonomy_enabled());

    let resp = client
        .post(format!("{base}/autonomy"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing autonomy value");
    assert!(
        stack.core.arbiter().autonomy_enabled(),
        "flag untouched on a rejected request"
    );
}
