//! Drover - control arbitration and multiplexed-link core for a
//! teleoperated ground vehicle
//!
//! The vehicle exposes one WebSocket endpoint per logical channel
//! (`/control`, `/video`, `/telemetry`, `/autonomy`) on a single link
//! server, plus a small HTTP API for the recording and autonomy flags.
//! Each drive cycle the arbiter decides whether the remote operator or
//! the onboard autonomy loop is authoritative and what actuation values
//! apply:
//!
//! - **Core types** (always available): CameraFrame, ChannelKind, wire types
//! - **`arbiter`**: control source selection, input staleness, marker interlock
//! - **`link`**: channel server, single-connection registry, per-channel handlers
//! - **`telemetry`**: snapshot assembly and wireless link sampling
//! - **`web`**: flag toggle HTTP API
//! - **`teleop`**: drive-cycle facade the vehicle runtime calls

// Core modules (no server attached)
mod arbiter;
mod config;
mod frame;
mod marker;
mod protocol;
mod teleop;

pub use arbiter::{
    Arbiter, ControlDecision, ControlSource, AUTONOMY_CRUISE_THROTTLE, AUTONOMY_STOP_THROTTLE,
};
pub use config::{
    Config, DEFAULT_AUTONOMY_LIVENESS, DEFAULT_TELEMETRY_INTERVAL, DEFAULT_USER_TIMEOUT,
};
pub use frame::{CameraFrame, JPEG_QUALITY, PREVIEW_HEIGHT, PREVIEW_WIDTH};
pub use marker::{MarkerDetector, MarkerId, NullMarkerDetector};
pub use protocol::{
    ChannelKind, ControlInput, CLOSE_SUPERSEDED, CLOSE_UNKNOWN_CHANNEL, REASON_SUPERSEDED,
    REASON_UNKNOWN_CHANNEL,
};
pub use teleop::{TeleopCore, TickOutput};

// Link: WebSocket channel server, registry, per-channel loops
pub mod link;

// Telemetry: snapshot assembly, `iw` wireless sampling
pub mod telemetry;

// Web: recording/autonomy flag HTTP API
pub mod web;
