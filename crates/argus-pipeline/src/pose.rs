//! Correlation of captured frames with historical robot pose.
//!
//! A frame is only useful to the detectors together with the robot's pose
//! at capture time. Pose history is owned by the rest of the engine and
//! consumed here through the [`StateHistory`] trait; the correlator decides
//! per frame whether to process, wait, or drop.

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Robot pose at a historical timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistPose {
    pub x_mm: f32,
    pub y_mm: f32,
    pub heading_rad: f32,
    pub head_angle_rad: f32,
    pub lift_height_mm: f32,
}

/// One gyro sample from the IMU history window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    pub timestamp_ms: u64,
    pub gyro_rad_s: [f32; 3],
}

/// Pose data attached to a frame before handoff to the worker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisionPoseData {
    /// Timestamp of the historical state actually used (may differ slightly
    /// from the frame timestamp when the history interpolates).
    pub timestamp_ms: u64,
    pub pose: HistPose,
    /// IMU samples surrounding the frame timestamp, for rolling-shutter
    /// style corrections inside the algorithms.
    pub imu_window: SmallVec<[ImuSample; 8]>,
}

/// Failure modes of a historical state lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoseLookupError {
    /// The pose at that timestamp belongs to a different origin (the robot
    /// delocalized since). Expected during relocalization; recoverable.
    #[error("pose origin mismatch")]
    OriginMismatch,

    /// No state bracketing the requested timestamp.
    #[error("no state at requested timestamp")]
    OutOfRange,

    /// Anything else the history implementation wants to surface.
    #[error("state history failure: {0}")]
    Other(String),
}

/// Robot pose/state history, owned by the engine.
pub trait StateHistory {
    /// Timestamp of the oldest retained state, if any.
    fn oldest_timestamp(&self) -> Option<u64>;

    /// Timestamp of the newest retained state, if any.
    fn newest_timestamp(&self) -> Option<u64>;

    /// Interpolated state at `timestamp_ms`, plus the timestamp of the
    /// state actually used.
    fn compute_state_at(&self, timestamp_ms: u64) -> Result<(HistPose, u64), PoseLookupError>;

    /// IMU samples around `timestamp_ms`. Defaults to empty for histories
    /// that do not retain IMU data.
    fn imu_window(&self, timestamp_ms: u64) -> SmallVec<[ImuSample; 8]> {
        let _ = timestamp_ms;
        SmallVec::new()
    }
}

/// Per-frame correlation decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// State found; frame may be handed to the worker.
    Ready(VisionPoseData),
    /// History has nothing new enough yet; keep the frame buffered and
    /// retry next tick.
    AwaitState,
    /// Frame predates the oldest retained state (startup, or history was
    /// cleared on delocalization). Drop it.
    DropTooOld,
    /// Origin mismatch: expected during delocalization, drop quietly.
    DropOriginMismatch,
    /// Lookup failed for another reason; drop with a warning.
    DropLookupFailed,
}

/// Stateless lookup policy mapping history answers to per-frame decisions.
pub struct PoseCorrelator;

impl PoseCorrelator {
    pub fn correlate(history: &dyn StateHistory, frame_timestamp_ms: u64) -> Correlation {
        let Some(oldest) = history.oldest_timestamp() else {
            // Nothing in history yet; same as "not new enough".
            return Correlation::AwaitState;
        };

        if frame_timestamp_ms < oldest {
            debug!(
                frame_ts = frame_timestamp_ms,
                oldest, "frame older than state history; dropping"
            );
            return Correlation::DropTooOld;
        }

        let newest = history.newest_timestamp().unwrap_or(oldest);
        if newest < frame_timestamp_ms {
            debug!(
                frame_ts = frame_timestamp_ms,
                newest, "waiting for state history to catch up to frame"
            );
            return Correlation::AwaitState;
        }

        match history.compute_state_at(frame_timestamp_ms) {
            Ok((pose, actual_ts)) => Correlation::Ready(VisionPoseData {
                timestamp_ms: actual_ts,
                pose,
                imu_window: history.imu_window(actual_ts),
            }),
            Err(PoseLookupError::OriginMismatch) => {
                info!(
                    frame_ts = frame_timestamp_ms,
                    "pose origin mismatch; dropping frame"
                );
                Correlation::DropOriginMismatch
            },
            Err(err) => {
                warn!(
                    frame_ts = frame_timestamp_ms,
                    error = %err,
                    "state lookup failed; dropping frame"
                );
                Correlation::DropLookupFailed
            },
        }
    }
}
