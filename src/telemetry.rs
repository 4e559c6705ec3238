//! Telemetry snapshot assembly and wireless link sampling
//!
//! The telemetry channel pushes one JSON snapshot per interval while a
//! client is connected. Wireless details come from a [`LinkMonitor`];
//! the stock implementation shells out to `iw`, so it is always called
//! from the blocking pool.

use crate::arbiter::Arbiter;
use crate::link::registry::ChannelRegistry;
use crate::protocol::ChannelKind;
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::debug;

/// Wireless association details as sampled from the system.
/// Both fields are `None` whenever sampling fails for any reason.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStatus {
    /// BSSID of the associated access point
    pub ap_mac: Option<String>,
    /// Received signal strength in dBm
    pub signal_strength: Option<f32>,
}

/// One status snapshot as sent on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub ap_mac: Option<String>,
    pub signal_strength: Option<f32>,
    /// Mode string of the source that would win arbitration right now
    pub user_mode: String,
    /// Whether a control client currently holds its channel
    pub back_connection: bool,
}

/// Source of wireless link details.
pub trait LinkMonitor: Send + Sync {
    /// Sample the current link. Blocking; never errors, failures come
    /// back as an empty [`LinkStatus`].
    fn sample(&self) -> LinkStatus;
}

/// Monitor that runs `iw dev <interface> link` and parses its output.
pub struct IwLinkMonitor {
    interface: String,
}

impl IwLinkMonitor {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }
}

impl LinkMonitor for IwLinkMonitor {
    fn sample(&self) -> LinkStatus {
        match Command::new("iw")
            .args(["dev", &self.interface, "link"])
            .output()
        {
            Ok(output) if output.status.success() => {
                parse_iw_link(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(interface = %self.interface, status = %output.status, "iw exited nonzero");
                LinkStatus::default()
            }
            Err(e) => {
                debug!(interface = %self.interface, error = %e, "iw invocation failed");
                LinkStatus::default()
            }
        }
    }
}

/// Monitor returning a fixed status. Used by tests and wired
/// deployments with no wireless interface.
#[derive(Debug, Default)]
pub struct StaticLinkMonitor(pub LinkStatus);

impl LinkMonitor for StaticLinkMonitor {
    fn sample(&self) -> LinkStatus {
        self.0.clone()
    }
}

/// Assemble one telemetry snapshot from the live system state.
pub async fn snapshot(
    arbiter: &Arbiter,
    registry: &ChannelRegistry,
    link: LinkStatus,
) -> TelemetrySnapshot {
    TelemetrySnapshot {
        ap_mac: link.ap_mac,
        signal_strength: link.signal_strength,
        user_mode: arbiter.select_active_source().as_str().to_string(),
        back_connection: registry.attached(ChannelKind::Control).await,
    }
}

/// Parse `iw dev <iface> link` output. Lines of interest:
///
/// ```text
/// Connected to aa:bb:cc:dd:ee:ff (on wlan0)
///         signal: -58 dBm
/// ```
fn parse_iw_link(output: &str) -> LinkStatus {
    let mut status = LinkStatus::default();
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Connected to ") {
            if let Some(mac) = rest.split_whitespace().next() {
                if looks_like_mac(mac) {
                    status.ap_mac = Some(mac.to_string());
                }
            }
        } else if let Some(rest) = line.strip_prefix("signal:") {
            if let Some(value) = rest.split_whitespace().next() {
                if let Ok(dbm) = value.parse::<f32>() {
                    status.signal_strength = Some(dbm);
                }
            }
        }
    }
    status
}

fn looks_like_mac(s: &str) -> bool {
    s.len() == 17 && s.bytes().all(|b| b == b':' || b.is_ascii_hexdigit())
}
