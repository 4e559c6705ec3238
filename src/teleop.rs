//! Drive-cycle facade tying the arbiter, channel registry, and frame
//! path together
//!
//! The vehicle runtime owns a [`TeleopCore`] and calls
//! [`TeleopCore::on_tick`] once per drive cycle from its own (sync)
//! thread. Everything async hangs off the state bundles handed out by
//! [`TeleopCore::link_state`] and [`TeleopCore::arbiter`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::warn;

use crate::arbiter::{Arbiter, ControlSource};
use crate::config::Config;
use crate::frame::CameraFrame;
use crate::link::registry::ChannelRegistry;
use crate::link::LinkState;
use crate::marker::MarkerDetector;
use crate::telemetry::LinkMonitor;

/// Actuation decision for one drive cycle.
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// Steering angle to apply
    pub angle: f32,
    /// Throttle to apply
    pub throttle: f32,
    /// Source the values came from
    pub mode: ControlSource,
    /// Whether the recording flag is asserted for this cycle
    pub recording: bool,
    /// Downscaled copy of the input frame, when one was provided
    pub preview: Option<CameraFrame>,
}

/// Owns the arbiter and the frame path; the entry point the vehicle
/// runtime drives.
pub struct TeleopCore {
    config: Config,
    arbiter: Arc<Arbiter>,
    registry: Arc<ChannelRegistry>,
    monitor: Arc<dyn LinkMonitor>,
    frame_tx: watch::Sender<Option<Arc<CameraFrame>>>,
    frame_rx: watch::Receiver<Option<Arc<CameraFrame>>>,
}

impl TeleopCore {
    pub fn new(
        config: Config,
        detector: Arc<dyn MarkerDetector>,
        monitor: Arc<dyn LinkMonitor>,
    ) -> Result<Self> {
        config.validate().context("invalid teleop configuration")?;
        let arbiter = Arc::new(Arbiter::new(
            config.user_timeout,
            config.autonomy_liveness,
            detector,
        ));
        let (frame_tx, frame_rx) = watch::channel(None);
        Ok(Self {
            config,
            arbiter,
            registry: Arc::new(ChannelRegistry::new()),
            monitor,
            frame_tx,
            frame_rx,
        })
    }

    pub fn arbiter(&self) -> Arc<Arbiter> {
        self.arbiter.clone()
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// State bundle for [`crate::link::serve`].
    pub fn link_state(&self) -> Arc<LinkState> {
        Arc::new(LinkState {
            arbiter: self.arbiter.clone(),
            registry: self.registry.clone(),
            frames: self.frame_rx.clone(),
            monitor: self.monitor.clone(),
            telemetry_interval: self.config.telemetry_interval,
        })
    }

    /// Push a frame toward the video channel without running a drive
    /// cycle. Never blocks: a frame still pending is replaced rather
    /// than queued, and with no video client attached the frame is
    /// simply dropped.
    pub fn submit_frame(&self, frame: CameraFrame) {
        self.frame_tx.send_replace(Some(Arc::new(frame)));
    }

    /// One drive cycle: publish the camera frame (if any) to the video
    /// channel, then resolve the actuation decision for this cycle.
    pub fn on_tick(&self, frame: Option<CameraFrame>) -> TickOutput {
        let frame = frame.map(Arc::new);
        let mut preview = None;
        if let Some(frame) = &frame {
            self.frame_tx.send_replace(Some(frame.clone()));
            match frame.resize(self.config.preview_width, self.config.preview_height) {
                Ok(scaled) => preview = Some(scaled),
                Err(e) => warn!(error = %e, "preview resize failed"),
            }
        }
        let decision = self.arbiter.get_active_control(frame.as_deref());
        TickOutput {
            angle: decision.angle,
            throttle: decision.throttle,
            mode: decision.source,
            recording: decision.recording,
            preview,
        }
    }
}
