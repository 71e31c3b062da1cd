//! # Argus Camera Abstraction
//!
//! Hardware seam between the perception pipeline and the camera driver.
//! Frames are *leased*: every buffer handed out by [`CameraAdapter::frame`]
//! must be returned through [`CameraAdapter::release_frame`] exactly once,
//! on every exit path. The pipeline crate enforces that discipline; this
//! crate only defines the contract.

use std::fmt;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::MockCamera;

/// Camera adapter layer errors.
#[derive(Error, Debug)]
pub enum CameraError {
    /// Backend/driver failure (device gone, ioctl failure, ...).
    #[error("Camera device error: {0}")]
    Device(String),

    /// Operation attempted while the driver is stopped.
    #[error("Camera not started")]
    NotStarted,

    /// The driver rejected the requested pixel format.
    #[error("Unsupported capture format: {0}")]
    UnsupportedFormat(PixelFormat),
}

/// Pixel encoding delivered by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 24-bit RGB, delivered downsampled to half sensor resolution.
    Rgb888,
    /// Planar Y + interleaved UV, delivered at full sensor resolution.
    Yuv420sp,
}

impl PixelFormat {
    /// Row count a frame of this format is expected to carry, given the
    /// sensor's native row count. Used by the pipeline to recognize the
    /// first frame produced after a format switch.
    pub fn expected_rows(self, sensor_rows: u32) -> u32 {
        match self {
            PixelFormat::Rgb888 => sensor_rows / 2,
            PixelFormat::Yuv420sp => sensor_rows,
        }
    }

    /// Bytes per row for a frame of `cols` pixels.
    pub fn row_stride(self, cols: u32) -> usize {
        match self {
            PixelFormat::Rgb888 => cols as usize * 3,
            // Y rows plus the packed UV payload averaged per row
            PixelFormat::Yuv420sp => cols as usize * 3 / 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One leased camera frame.
///
/// The `release_id` identifies the underlying driver buffer; it must be
/// passed back to [`CameraAdapter::release_frame`] when the frame is done,
/// after which the buffer contents must not be touched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pub release_id: u32,
    pub rows: u32,
    pub cols: u32,
    pub format: PixelFormat,
    /// Capture timestamp, milliseconds on the robot clock.
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.rows == 0 || self.cols == 0
    }
}

/// Camera driver abstraction.
///
/// Implementations wrap the platform capture stack; tests use
/// [`mock::MockCamera`]. All calls are non-blocking.
pub trait CameraAdapter: Send {
    /// Poll for the next available frame.
    ///
    /// `newer_than_ms` is a hint: the driver may skip frames no newer than
    /// it. Returns `Ok(None)` when no frame is ready.
    fn frame(&mut self, newer_than_ms: u64) -> Result<Option<ImageBuffer>, CameraError>;

    /// Return a leased buffer to the driver pool. Returns `false` if the id
    /// was not an outstanding lease.
    fn release_frame(&mut self, release_id: u32) -> bool;

    /// Reconfigure the pixel encoding. Must only be called while no frame
    /// lease is outstanding; the pipeline's format state machine guarantees
    /// this.
    fn set_capture_format(&mut self, format: PixelFormat) -> Result<(), CameraError>;

    fn sensor_width(&self) -> u32;

    fn sensor_height(&self) -> u32;

    /// Stop capture (first half of the restart escalation).
    fn stop(&mut self) -> Result<(), CameraError>;

    /// Reinitialize after [`Self::stop`].
    fn restart(&mut self) -> Result<(), CameraError>;
}
