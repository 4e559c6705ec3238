//! Control-source arbitration for the drive cycle
//!
//! Two sources compete for actuation authority: the remote operator
//! (control channel) and the onboard autonomy loop (autonomy channel
//! heartbeat). The arbiter holds the latest operator sample, the active
//! source, and the autonomy/recording flags, and resolves one
//! authoritative decision per drive cycle. All state is atomic so the
//! vehicle runtime can call in from its own thread while the channel
//! tasks write from the tokio runtime.

use crate::frame::CameraFrame;
use crate::marker::MarkerDetector;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Throttle applied while the autonomous source is active and no stop
/// marker is in view.
pub const AUTONOMY_CRUISE_THROTTLE: f32 = 0.9;
/// Throttle applied while at least one stop marker is in view.
pub const AUTONOMY_STOP_THROTTLE: f32 = 0.0;

/// Which party is authoritative for actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSource {
    /// Remote operator input
    User,
    /// Onboard autonomy loop
    Autonomous,
}

impl ControlSource {
    /// Mode string as it appears on the wire and in the vehicle runtime.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSource::User => "user",
            ControlSource::Autonomous => "local_angle",
        }
    }

    fn as_bits(self) -> u8 {
        match self {
            ControlSource::User => 0,
            ControlSource::Autonomous => 1,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => ControlSource::Autonomous,
            _ => ControlSource::User,
        }
    }
}

impl std::fmt::Display for ControlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved actuation decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    pub angle: f32,
    pub throttle: f32,
    pub source: ControlSource,
    pub recording: bool,
}

/// Arbitration state shared between the channel tasks and the drive cycle.
///
/// Single writer per field: the control channel writes the input sample,
/// the autonomy channel writes the source, the HTTP surface writes the
/// flags. Floats are stored as raw bits in `AtomicU32`s; the input
/// timestamp is milliseconds since construction.
pub struct Arbiter {
    started: Instant,
    source: AtomicU8,
    throttle: AtomicU32,
    angle: AtomicU32,
    input_at_ms: AtomicU64,
    autonomy_enabled: AtomicBool,
    recording_enabled: AtomicBool,
    user_timeout: Duration,
    autonomy_liveness: Duration,
    detector: Arc<dyn MarkerDetector>,
}

impl Arbiter {
    /// Create an arbiter with the operator source active, a neutral
    /// input sample, and both flags off.
    pub fn new(
        user_timeout: Duration,
        autonomy_liveness: Duration,
        detector: Arc<dyn MarkerDetector>,
    ) -> Self {
        Self {
            started: Instant::now(),
            source: AtomicU8::new(ControlSource::User.as_bits()),
            throttle: AtomicU32::new(0f32.to_bits()),
            angle: AtomicU32::new(0f32.to_bits()),
            input_at_ms: AtomicU64::new(0),
            autonomy_enabled: AtomicBool::new(false),
            recording_enabled: AtomicBool::new(false),
            user_timeout,
            autonomy_liveness,
            detector,
        }
    }

    /// The source most recently requested by the autonomy channel.
    pub fn current_source(&self) -> ControlSource {
        ControlSource::from_bits(self.source.load(Ordering::Relaxed))
    }

    /// Switch the active source. No-op if unchanged.
    pub fn set_source(&self, target: ControlSource) {
        let current = self.current_source();
        if current != target {
            self.source.store(target.as_bits(), Ordering::Relaxed);
            info!(from = %current, to = %target, "control source switched");
        }
    }

    /// Record the latest operator sample and refresh its timestamp.
    pub fn update_user_input(&self, throttle: f32, angle: f32) {
        self.throttle.store(throttle.to_bits(), Ordering::Relaxed);
        self.angle.store(angle.to_bits(), Ordering::Relaxed);
        self.input_at_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Resolve which source is authoritative right now.
    ///
    /// With autonomy disabled this yields `Autonomous`. With autonomy
    /// enabled, `Autonomous` holds only while the heartbeat has claimed
    /// it; otherwise the operator is authoritative. This matches the
    /// deployed controller behavior exactly.
    pub fn select_active_source(&self) -> ControlSource {
        if !self.autonomy_enabled() {
            return ControlSource::Autonomous;
        }
        if self.current_source() == ControlSource::Autonomous {
            return ControlSource::Autonomous;
        }
        ControlSource::User
    }

    /// Resolve the actuation decision for one drive cycle.
    ///
    /// Operator path: a sample older than the input timeout is reset to
    /// neutral before it is returned, so a dead link can never replay the
    /// last commanded motion. Autonomous path: angle is always neutral,
    /// throttle comes from the marker interlock, recording is always off.
    pub fn get_active_control(&self, frame: Option<&CameraFrame>) -> ControlDecision {
        let source = self.select_active_source();

        if source == ControlSource::User {
            if self.input_stale() {
                self.reset_input();
            }
            return ControlDecision {
                angle: f32::from_bits(self.angle.load(Ordering::Relaxed)),
                throttle: f32::from_bits(self.throttle.load(Ordering::Relaxed)),
                source,
                recording: self.recording_enabled(),
            };
        }

        ControlDecision {
            angle: 0.0,
            throttle: self.evaluate_autonomous_throttle(frame),
            source,
            recording: false,
        }
    }

    /// Marker interlock: any visible marker stops the vehicle, otherwise
    /// cruise. A missing frame or a failed detection counts as no
    /// markers; the drive cycle may run before the first frame arrives.
    pub fn evaluate_autonomous_throttle(&self, frame: Option<&CameraFrame>) -> f32 {
        let Some(frame) = frame else {
            return AUTONOMY_CRUISE_THROTTLE;
        };
        match self.detector.detect(frame) {
            Ok(markers) if !markers.is_empty() => {
                info!(count = markers.len(), "stop markers in view");
                AUTONOMY_STOP_THROTTLE
            }
            Ok(_) => AUTONOMY_CRUISE_THROTTLE,
            Err(e) => {
                warn!(error = %e, "marker detection failed");
                AUTONOMY_CRUISE_THROTTLE
            }
        }
    }

    /// Whether autonomy may be selected at all (HTTP-toggled).
    pub fn autonomy_enabled(&self) -> bool {
        self.autonomy_enabled.load(Ordering::Relaxed)
    }

    pub fn set_autonomy_enabled(&self, enabled: bool) {
        self.autonomy_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether the vehicle runtime should record this cycle (HTTP-toggled).
    pub fn recording_enabled(&self) -> bool {
        self.recording_enabled.load(Ordering::Relaxed)
    }

    pub fn set_recording_enabled(&self, enabled: bool) {
        self.recording_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip the recording flag and return the new value.
    pub fn toggle_recording(&self) -> bool {
        !self.recording_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Staleness bound for the operator input sample.
    pub fn user_timeout(&self) -> Duration {
        self.user_timeout
    }

    /// Silence bound after which the autonomy channel is considered dead.
    pub fn autonomy_liveness(&self) -> Duration {
        self.autonomy_liveness
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn input_stale(&self) -> bool {
        // saturating: a concurrent update may land a tick after `now` was read
        let age = self
            .now_ms()
            .saturating_sub(self.input_at_ms.load(Ordering::Relaxed));
        age > self.user_timeout.as_millis() as u64
    }

    fn reset_input(&self) {
        self.throttle.store(0f32.to_bits(), Ordering::Relaxed);
        self.angle.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("source", &self.current_source())
            .field("autonomy_enabled", &self.autonomy_enabled())
            .field("recording_enabled", &self.recording_enabled())
            .finish()
    }
}
