//! # Argus Vision Pipeline
//!
//! Onboard perception pipeline: a mode scheduler spreads detector work
//! across engine ticks, capture leases frames from the camera driver,
//! each frame is correlated with historical robot pose, processed by a
//! single-flight background worker, and the results fan out to per-domain
//! sinks on the main thread.
//!
//! Construction and ticking happen on the engine thread; the only other
//! thread is the worker spawned by [`VisionPipeline::start`] in
//! asynchronous mode.

use parking_lot::Mutex;
use std::sync::Arc;

pub mod capture;
pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod pose;
pub mod stats;
pub mod worker;

/// Camera handle shared between the capture path and the worker thread.
/// Both sides take the lock only for short, non-blocking driver calls.
pub type SharedCamera = Arc<Mutex<dyn argus_camera::CameraAdapter>>;

pub use capture::{CaptureConfig, CaptureFormatState, FrameAcquisition};
pub use dispatch::{
    CalibrationResult, CameraParamsUpdate, DispatchOutcome, FaceObservation, IlluminationState,
    MarkerObservation, MirrorSink, MotionCentroid, OverheadEdgeFrame, PetObservation, PhotoReady,
    ResultDispatcher, ResultSinks, SalientPoint, SinkError, VisionProcessingResult, VisualObstacle,
};
pub use error::{FaultCode, PipelineError};
pub use mailbox::Mailbox;
pub use pipeline::{CameraCalibration, RunMode, TickReport, VisionPipeline};
pub use pose::{
    Correlation, HistPose, ImuSample, PoseCorrelator, PoseLookupError, StateHistory,
    VisionPoseData,
};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{AlgorithmError, ProcessingWorker, VisionAlgorithms, VisionSystemInput};
