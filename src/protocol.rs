//! Wire protocol types for the multiplexed teleoperation link
//!
//! One WebSocket connection per logical channel; the request path selects
//! the channel. Control and autonomy messages are JSON text, video is
//! binary JPEG, telemetry is JSON text pushed on an interval.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Close code sent when a connection requests an unknown channel path.
pub const CLOSE_UNKNOWN_CHANNEL: u16 = 1003;
/// Close code sent to a connection superseded by a newer one on its channel.
pub const CLOSE_SUPERSEDED: u16 = 1000;

/// Close reason paired with [`CLOSE_UNKNOWN_CHANNEL`].
pub const REASON_UNKNOWN_CHANNEL: &str = "unknown channel";
/// Close reason paired with [`CLOSE_SUPERSEDED`].
pub const REASON_SUPERSEDED: &str = "superseded";

/// The four logical channels multiplexed over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Operator control input (inbound JSON)
    Control,
    /// Live camera feed (outbound binary JPEG)
    Video,
    /// Periodic status snapshot (outbound JSON)
    Telemetry,
    /// Autonomy-mode heartbeat (inbound JSON, liveness-checked)
    Autonomy,
}

impl ChannelKind {
    /// All channels, in slot order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Control,
        ChannelKind::Video,
        ChannelKind::Telemetry,
        ChannelKind::Autonomy,
    ];

    /// Parse a request path tail ("control", "/control", ...) into a channel.
    pub fn from_target(target: &str) -> Option<Self> {
        match target.trim_start_matches('/') {
            "control" => Some(ChannelKind::Control),
            "video" => Some(ChannelKind::Video),
            "telemetry" => Some(ChannelKind::Telemetry),
            "autonomy" => Some(ChannelKind::Autonomy),
            _ => None,
        }
    }

    /// Path segment naming this channel on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Control => "control",
            ChannelKind::Video => "video",
            ChannelKind::Telemetry => "telemetry",
            ChannelKind::Autonomy => "autonomy",
        }
    }

    /// Registry slot index.
    pub fn index(&self) -> usize {
        match self {
            ChannelKind::Control => 0,
            ChannelKind::Video => 1,
            ChannelKind::Telemetry => 2,
            ChannelKind::Autonomy => 3,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator control sample as sent on the control channel.
///
/// Missing fields default to neutral; unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControlInput {
    #[serde(default)]
    pub throttle: f32,
    #[serde(default)]
    pub angle: f32,
}

/// Error reply sent back on the control channel when a message cannot
/// be parsed. The connection stays open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

/// Loose truthiness over JSON values: null, false, zero, empty string,
/// empty array and empty object are falsy, everything else is truthy.
/// Operator consoles send the autonomy flag in whatever shape their UI
/// framework produces, so the link accepts all of them.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Whether an autonomy heartbeat asks for the autonomous source.
/// A missing `autonomy` field counts as disengaged.
pub fn autonomy_engaged(msg: &Value) -> bool {
    msg.get("autonomy").map(truthy).unwrap_or(false)
}
