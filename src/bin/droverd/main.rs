//! Drover Daemon
//!
//! Runs the full teleoperation stack on the vehicle: the four-channel
//! link server, the flag API, and a fixed-rate drive loop feeding the
//! arbiter. Actuation values are logged; wiring them to a motor
//! controller happens in the vehicle runtime that embeds [`drover`].
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: link on 0.0.0.0:8080, API on 0.0.0.0:8081, wlan0, 50ms ticks
//! droverd
//!
//! # Development without a camera: synthetic frames on the video channel
//! droverd --test-source
//!
//! # Override binds and drive cadence
//! DROVER_BIND=0.0.0.0:9000 DROVER_TICK_MS=100 droverd
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, error, info};

use drover::telemetry::IwLinkMonitor;
use drover::{CameraFrame, Config, NullMarkerDetector, TeleopCore};

/// Daemon configuration from environment/args
struct DaemonConfig {
    /// Core teleop settings (binds, bounds, wireless interface)
    teleop: Config,
    /// Drive cycle period
    tick: Duration,
    /// Generate synthetic camera frames instead of reading hardware
    test_source: bool,
}

impl DaemonConfig {
    fn from_env() -> Result<Self> {
        let mut teleop = Config::default();

        if let Ok(raw) = std::env::var("DROVER_BIND") {
            teleop.link_bind = raw
                .parse::<SocketAddr>()
                .context("Invalid DROVER_BIND address")?;
        }
        if let Ok(raw) = std::env::var("DROVER_API_BIND") {
            teleop.api_bind = raw
                .parse::<SocketAddr>()
                .context("Invalid DROVER_API_BIND address")?;
        }
        if let Ok(iface) = std::env::var("DROVER_IFACE") {
            teleop.wireless_interface = iface;
        }

        let tick_ms: u64 = std::env::var("DROVER_TICK_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);

        let args: Vec<String> = std::env::args().collect();
        let test_source = args.iter().any(|arg| arg == "--test-source");

        Ok(Self {
            teleop,
            tick: Duration::from_millis(tick_ms.max(1)),
            test_source,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = DaemonConfig::from_env()?;

    info!("Drover starting");
    info!("  Link: ws://{}", config.teleop.link_bind);
    info!("  API: http://{}", config.teleop.api_bind);
    info!("  Wireless interface: {}", config.teleop.wireless_interface);
    info!("  Drive cycle: {:?}", config.tick);
    info!("  Test source: {}", config.test_source);

    let monitor = Arc::new(IwLinkMonitor::new(config.teleop.wireless_interface.clone()));
    let core = Arc::new(TeleopCore::new(
        config.teleop.clone(),
        Arc::new(NullMarkerDetector),
        monitor,
    )?);

    // Bind both servers up front so an occupied port fails the start
    // instead of logging from a background task.
    let link_listener = TcpListener::bind(config.teleop.link_bind)
        .await
        .with_context(|| format!("failed to bind link server on {}", config.teleop.link_bind))?;
    let api_listener = TcpListener::bind(config.teleop.api_bind)
        .await
        .with_context(|| format!("failed to bind flag API on {}", config.teleop.api_bind))?;
    info!("link server listening on ws://{}", link_listener.local_addr()?);
    info!("flag API listening on http://{}", api_listener.local_addr()?);

    let link_state = core.link_state();
    tokio::spawn(async move {
        if let Err(e) = drover::link::serve_on(link_listener, link_state).await {
            error!(error = %e, "link server exited");
        }
    });

    let arbiter = core.arbiter();
    tokio::spawn(async move {
        if let Err(e) = drover::web::serve_on(api_listener, arbiter).await {
            error!(error = %e, "flag API exited");
        }
    });

    // Drive loop: one arbiter decision per tick. With --test-source each
    // tick also pushes a synthetic frame through the video channel.
    let drive_core = core.clone();
    let tick = config.tick;
    let test_source = config.test_source;
    tokio::spawn(async move {
        let mut ticker = interval(tick);
        let mut cycle = 0u64;
        loop {
            ticker.tick().await;
            cycle += 1;
            let frame = test_source.then(|| synthetic_frame(320, 240, cycle));
            let out = drive_core.on_tick(frame);
            debug!(
                cycle,
                angle = out.angle,
                throttle = out.throttle,
                mode = %out.mode,
                recording = out.recording,
                "drive tick"
            );
        }
    });

    // Stats until SIGINT
    let mut stats_interval = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = stats_interval.tick() => {
                let arbiter = core.arbiter();
                info!(
                    "Stats: source={}, autonomy_enabled={}, recording={}",
                    arbiter.current_source(),
                    arbiter.autonomy_enabled(),
                    arbiter.recording_enabled(),
                );
            }
        }
    }

    info!("Drover shutting down");
    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drover=info".parse().unwrap()),
        )
        .init();
}

/// Scrolling two-tone stripe pattern. Enough to see motion in a video
/// client and to exercise the JPEG path without a camera.
fn synthetic_frame(width: u32, height: u32, cycle: u64) -> CameraFrame {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let phase = (cycle * 4) as u32;
    for y in 0..height {
        let base = (y * 255 / height.max(1)) as u8;
        for x in 0..width {
            if ((x + phase) / 20) % 2 == 0 {
                rgb.extend_from_slice(&[base, 200, 64]);
            } else {
                rgb.extend_from_slice(&[32, base, 160]);
            }
        }
    }
    CameraFrame::new(width, height, rgb).expect("buffer sized from dimensions")
}
