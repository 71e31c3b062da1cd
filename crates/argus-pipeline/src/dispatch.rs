//! Result types and main-thread dispatch of worker output.
//!
//! The worker publishes one [`VisionProcessingResult`] per processed frame
//! over a channel; [`ResultDispatcher::drain`] runs on the engine tick and
//! fans each result out to the per-domain [`ResultSinks`] callbacks. A
//! failing sink is logged and counted but never stops the drain, and the
//! drain itself is bounded so a backlog cannot monopolize a tick.

use argus_modes::{VisionMode, VisionModeSet};
use crossbeam_channel::{Receiver, TryRecvError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::pose::HistPose;

/// Upper bound on results handled per engine tick.
pub const MAX_RESULTS_PER_TICK: usize = 32;

/// A detected fiducial marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub timestamp_ms: u64,
    pub marker_code: u16,
    /// Image-space corners, clockwise from top-left.
    pub corners_px: [[f32; 2]; 4],
    /// Marker pose relative to the camera, millimeters and radians.
    pub x_mm: f32,
    pub y_mm: f32,
    pub z_mm: f32,
    pub angle_rad: f32,
}

/// A detected human face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub timestamp_ms: u64,
    /// Stable track id; negative ids are tracks not yet enrolled.
    pub face_id: i32,
    pub name: Option<String>,
    pub rect_px: [f32; 4],
    pub score: f32,
}

/// A detected pet (cat or dog).
#[derive(Debug, Clone, PartialEq)]
pub struct PetObservation {
    pub timestamp_ms: u64,
    pub pet_id: i32,
    pub rect_px: [f32; 4],
    pub score: f32,
}

/// Centroid of detected inter-frame motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCentroid {
    pub timestamp_ms: u64,
    /// Fraction of the image area that moved, 0..=1.
    pub area_fraction: f32,
    pub centroid_px: [f32; 2],
    /// Ground-plane projection of the centroid, if the pose allowed one.
    pub ground_mm: Option<[f32; 2]>,
}

/// Drivable-edge estimate from the overhead (downward-looking) crop.
#[derive(Debug, Clone, PartialEq)]
pub struct OverheadEdgeFrame {
    pub timestamp_ms: u64,
    /// Edge points in robot frame, millimeters.
    pub points_mm: Vec<[f32; 2]>,
    pub is_border: bool,
}

/// Output of a completed calibration computation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub timestamp_ms: u64,
    pub focal_length_px: [f32; 2],
    pub center_px: [f32; 2],
    pub distortion: Vec<f32>,
}

/// Auto-exposure / white-balance update to push down to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParamsUpdate {
    pub timestamp_ms: u64,
    pub exposure_ms: f32,
    pub gain: f32,
    pub wb_gains: [f32; 3],
}

/// Measured scene illumination bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlluminationState {
    Dark,
    Dim,
    Lit,
}

/// A point of visual interest (saliency), always computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalientPoint {
    pub timestamp_ms: u64,
    pub point_px: [f32; 2],
    pub saliency: f32,
}

/// An obstacle inferred from vision, robot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualObstacle {
    pub timestamp_ms: u64,
    pub x_mm: f32,
    pub y_mm: f32,
    pub radius_mm: f32,
}

/// A stored photo ready for retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoReady {
    pub timestamp_ms: u64,
    pub path: String,
}

/// Everything the worker produced for one frame.
///
/// Collections are empty for modes that did not run on this frame;
/// `modes_processed` records which ones did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisionProcessingResult {
    pub timestamp_ms: u64,
    pub modes_processed: VisionModeSet,
    pub pose: HistPose,
    pub markers: Vec<MarkerObservation>,
    pub faces: Vec<FaceObservation>,
    pub pets: Vec<PetObservation>,
    pub motion: Option<MotionCentroid>,
    pub overhead_edges: Option<OverheadEdgeFrame>,
    pub calibration: Option<CalibrationResult>,
    pub camera_params: Option<CameraParamsUpdate>,
    pub illumination: Option<IlluminationState>,
    pub salient_points: Vec<SalientPoint>,
    pub obstacles: Vec<VisualObstacle>,
    pub photo: Option<PhotoReady>,
}

/// A sink callback failure. Logged and counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("result sink failure: {0}")]
pub struct SinkError(pub String);

/// Per-domain consumers of processing results.
///
/// Every method defaults to a no-op so integrations only implement the
/// domains they care about. Mode-gated sinks are only invoked when the
/// corresponding mode actually ran on the frame; [`Self::handle_salient_points`]
/// and [`Self::handle_obstacles`] are invoked for every result regardless,
/// since saliency and obstacle inference run as byproducts of whatever
/// else processed the frame.
#[allow(unused_variables)]
pub trait ResultSinks {
    fn handle_markers(&mut self, markers: &[MarkerObservation]) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_faces(&mut self, faces: &[FaceObservation]) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_pets(&mut self, pets: &[PetObservation]) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_motion(&mut self, motion: &MotionCentroid) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_overhead_edges(&mut self, edges: &OverheadEdgeFrame) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_calibration(&mut self, calibration: &CalibrationResult) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_camera_params(&mut self, update: &CameraParamsUpdate) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_illumination(&mut self, state: IlluminationState) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_salient_points(&mut self, points: &[SalientPoint]) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_obstacles(&mut self, obstacles: &[VisualObstacle]) -> Result<(), SinkError> {
        Ok(())
    }

    fn handle_photo(&mut self, photo: &PhotoReady) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink for the mirror-mode preview path, fed directly from capture.
pub trait MirrorSink {
    fn display(&mut self, frame: &argus_camera::ImageBuffer);
}

/// Outcome of one [`ResultDispatcher::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub results_handled: usize,
    pub any_handler_failed: bool,
}

/// Main-thread side of the result channel.
#[derive(Debug)]
pub struct ResultDispatcher {
    rx: Receiver<VisionProcessingResult>,
    last_processed_ts: u64,
}

impl ResultDispatcher {
    pub fn new(rx: Receiver<VisionProcessingResult>) -> Self {
        Self { rx, last_processed_ts: 0 }
    }

    /// Timestamp of the newest result dispatched so far.
    pub fn last_processed_timestamp(&self) -> u64 {
        self.last_processed_ts
    }

    /// Drain up to [`MAX_RESULTS_PER_TICK`] pending results into `sinks`.
    pub fn drain(&mut self, sinks: &mut dyn ResultSinks) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        while outcome.results_handled < MAX_RESULTS_PER_TICK {
            let result = match self.rx.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            if self.dispatch_one(&result, sinks) {
                outcome.any_handler_failed = true;
            }
            self.last_processed_ts = self.last_processed_ts.max(result.timestamp_ms);
            outcome.results_handled += 1;
        }
        if outcome.results_handled == MAX_RESULTS_PER_TICK {
            debug!("result drain hit per-tick cap; remainder deferred");
        }
        outcome
    }

    /// Fan one result out to the sinks. Returns true if any handler failed.
    fn dispatch_one(&mut self, result: &VisionProcessingResult, sinks: &mut dyn ResultSinks) -> bool {
        let mut failed = false;
        let mut report = |domain: &'static str, outcome: Result<(), SinkError>| {
            if let Err(err) = outcome {
                warn!(domain, error = %err, "result sink failed");
                failed = true;
            }
        };

        let modes = result.modes_processed;
        if modes.contains(VisionMode::Markers) {
            report("markers", sinks.handle_markers(&result.markers));
        }
        if modes.contains(VisionMode::Faces) {
            report("faces", sinks.handle_faces(&result.faces));
        }
        if modes.contains(VisionMode::Pets) {
            report("pets", sinks.handle_pets(&result.pets));
        }
        if modes.contains(VisionMode::Motion) {
            if let Some(motion) = &result.motion {
                report("motion", sinks.handle_motion(motion));
            }
        }
        if modes.contains(VisionMode::OverheadEdges) {
            if let Some(edges) = &result.overhead_edges {
                report("overhead_edges", sinks.handle_overhead_edges(edges));
            }
        }
        if modes.contains(VisionMode::Calibration) {
            if let Some(calibration) = &result.calibration {
                report("calibration", sinks.handle_calibration(calibration));
            }
        }
        if modes.contains(VisionMode::AutoExposure) || modes.contains(VisionMode::WhiteBalance) {
            if let Some(update) = &result.camera_params {
                report("camera_params", sinks.handle_camera_params(update));
            }
        }
        if modes.contains(VisionMode::Illumination) {
            if let Some(state) = result.illumination {
                report("illumination", sinks.handle_illumination(state));
            }
        }
        if let Some(photo) = &result.photo {
            report("photo", sinks.handle_photo(photo));
        }

        // Saliency and obstacles are not gated on any single mode.
        report("salient_points", sinks.handle_salient_points(&result.salient_points));
        report("obstacles", sinks.handle_obstacles(&result.obstacles));

        failed
    }
}
