//! Pipeline error types.

use argus_camera::CameraError;
use argus_modes::ConfigError;
use std::fmt;
use thiserror::Error;

/// Standing fault codes surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Capture produced no frames and the stop/delay/restart escalation did
    /// not recover it.
    CameraStalled,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCode::CameraStalled => write!(f, "camera stalled"),
        }
    }
}

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Camera adapter failure.
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    /// Mode settings table failed to load or validate.
    #[error("Mode settings error: {0}")]
    Config(#[from] ConfigError),

    /// Operation requires a calibrated camera.
    #[error("Camera calibration not set")]
    NotCalibrated,

    /// The processing worker is not running.
    #[error("Processing worker not running")]
    WorkerNotRunning,

    /// A standing fault; surfaced once, after which the pipeline stays
    /// inert for the affected path.
    #[error("Pipeline fault: {0}")]
    Fault(FaultCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Camera(CameraError::NotStarted);
        assert!(err.to_string().contains("Camera not started"));

        let err = PipelineError::Fault(FaultCode::CameraStalled);
        assert_eq!(err.to_string(), "Pipeline fault: camera stalled");

        assert_eq!(
            PipelineError::NotCalibrated.to_string(),
            "Camera calibration not set"
        );
    }

    #[test]
    fn test_from_camera_error() {
        let err: PipelineError = CameraError::Device("gone".into()).into();
        assert!(matches!(err, PipelineError::Camera(_)));
    }
}
