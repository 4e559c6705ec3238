//! Runtime configuration for the teleoperation core

use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::time::Duration;

use crate::frame::{PREVIEW_HEIGHT, PREVIEW_WIDTH};

/// Default staleness bound for operator input.
pub const DEFAULT_USER_TIMEOUT: Duration = Duration::from_millis(400);
/// Default silence bound for the autonomy heartbeat.
pub const DEFAULT_AUTONOMY_LIVENESS: Duration = Duration::from_millis(200);
/// Default telemetry push interval.
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for [`crate::TeleopCore`] and its servers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Link server bind address (the four WebSocket channels)
    pub link_bind: SocketAddr,
    /// Flag API bind address (HTTP)
    pub api_bind: SocketAddr,
    /// Operator input older than this is reset to neutral
    pub user_timeout: Duration,
    /// Autonomy heartbeat silence past this forces the autonomous source
    pub autonomy_liveness: Duration,
    /// Interval between telemetry snapshots
    pub telemetry_interval: Duration,
    /// Wireless interface sampled for telemetry
    pub wireless_interface: String,
    /// Drive-cycle preview width in pixels
    pub preview_width: u32,
    /// Drive-cycle preview height in pixels
    pub preview_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
            user_timeout: DEFAULT_USER_TIMEOUT,
            autonomy_liveness: DEFAULT_AUTONOMY_LIVENESS,
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            wireless_interface: "wlan0".to_string(),
            preview_width: PREVIEW_WIDTH,
            preview_height: PREVIEW_HEIGHT,
        }
    }
}

impl Config {
    /// Reject configurations that would disable a safety bound. Called
    /// at startup; a zero bound is a deployment mistake, not something
    /// to run with.
    pub fn validate(&self) -> Result<()> {
        if self.user_timeout.is_zero() {
            bail!("user input timeout must be nonzero");
        }
        if self.autonomy_liveness.is_zero() {
            bail!("autonomy liveness bound must be nonzero");
        }
        if self.telemetry_interval.is_zero() {
            bail!("telemetry interval must be nonzero");
        }
        if self.preview_width == 0 || self.preview_height == 0 {
            bail!("preview dimensions must be nonzero");
        }
        Ok(())
    }
}
