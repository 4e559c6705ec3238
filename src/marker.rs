//! Visual-marker detection seam for the autonomous throttle interlock

use crate::frame::CameraFrame;
use anyhow::Result;

/// Identifier of one detected fiducial marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub u32);

/// Synchronous marker detection over a raw camera frame.
///
/// Implementations must stay within the drive-cycle time budget: the
/// arbiter calls `detect` inline from the vehicle runtime thread, never
/// from an async task. The detection algorithm itself lives outside this
/// crate; [`NullMarkerDetector`] stands in where no detector is wired up.
pub trait MarkerDetector: Send + Sync {
    /// Detect markers in the frame. Order and duplicates are not significant.
    fn detect(&self, frame: &CameraFrame) -> Result<Vec<MarkerId>>;
}

/// Detector that never sees a marker. Used by the daemon when no
/// detection backend is configured, and by tests.
#[derive(Debug, Default)]
pub struct NullMarkerDetector;

impl MarkerDetector for NullMarkerDetector {
    fn detect(&self, _frame: &CameraFrame) -> Result<Vec<MarkerId>> {
        Ok(Vec::new())
    }
}
