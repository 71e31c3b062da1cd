//! Scriptable in-memory camera for tests.
//!
//! Tracks every lease so tests can assert the acquire/release balance, and
//! exposes failure toggles for the restart escalation paths.

use crate::{CameraAdapter, CameraError, ImageBuffer, PixelFormat};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// In-memory [`CameraAdapter`] fed by a scripted frame queue.
#[derive(Debug)]
pub struct MockCamera {
    pending: VecDeque<ImageBuffer>,
    outstanding: HashSet<u32>,
    next_release_id: u32,
    sensor_width: u32,
    sensor_height: u32,
    format: PixelFormat,
    running: bool,
    fail_next_frame: bool,
    acquired: u64,
    released: u64,
    restarts: u64,
    format_changes: Vec<PixelFormat>,
}

impl MockCamera {
    pub fn new(sensor_width: u32, sensor_height: u32, format: PixelFormat) -> Self {
        Self {
            pending: VecDeque::new(),
            outstanding: HashSet::new(),
            next_release_id: 1,
            sensor_width,
            sensor_height,
            format,
            running: true,
            fail_next_frame: false,
            acquired: 0,
            released: 0,
            restarts: 0,
            format_changes: Vec::new(),
        }
    }

    /// Queue a frame whose geometry matches the camera's current format.
    pub fn push_frame(&mut self, timestamp_ms: u64) {
        let format = self.format;
        self.push_frame_with(timestamp_ms, format);
    }

    /// Queue a frame with explicit format geometry (used to simulate stale
    /// frames arriving during a format switch).
    pub fn push_frame_with(&mut self, timestamp_ms: u64, format: PixelFormat) {
        let rows = format.expected_rows(self.sensor_height);
        let cols = match format {
            PixelFormat::Rgb888 => self.sensor_width / 2,
            PixelFormat::Yuv420sp => self.sensor_width,
        };
        let id = self.next_release_id;
        self.next_release_id += 1;
        self.pending.push_back(ImageBuffer {
            release_id: id,
            rows,
            cols,
            format,
            timestamp_ms,
            data: vec![0u8; format.row_stride(cols) * rows as usize],
        });
    }

    /// Queue a frame with an explicit timestamp and empty payload, to
    /// exercise the malformed-buffer path.
    pub fn push_empty_frame(&mut self, timestamp_ms: u64) {
        let id = self.next_release_id;
        self.next_release_id += 1;
        self.pending.push_back(ImageBuffer {
            release_id: id,
            rows: 0,
            cols: 0,
            format: self.format,
            timestamp_ms,
            data: Vec::new(),
        });
    }

    pub fn fail_next_frame(&mut self) {
        self.fail_next_frame = true;
    }

    pub fn acquired_count(&self) -> u64 {
        self.acquired
    }

    pub fn released_count(&self) -> u64 {
        self.released
    }

    /// Leases handed out but not yet returned.
    pub fn outstanding_leases(&self) -> usize {
        self.outstanding.len()
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_format(&self) -> PixelFormat {
        self.format
    }

    /// Every format the driver was asked to switch to, in order.
    pub fn format_changes(&self) -> &[PixelFormat] {
        &self.format_changes
    }
}

impl CameraAdapter for MockCamera {
    fn frame(&mut self, newer_than_ms: u64) -> Result<Option<ImageBuffer>, CameraError> {
        if self.fail_next_frame {
            self.fail_next_frame = false;
            return Err(CameraError::Device("injected failure".into()));
        }
        if !self.running {
            return Err(CameraError::NotStarted);
        }

        // The hint only skips genuinely old frames; scripted out-of-order
        // timestamps are still delivered so regression handling can be
        // tested (hint 0 disables skipping).
        while let Some(front) = self.pending.front() {
            if newer_than_ms > 0 && front.timestamp_ms != 0 && front.timestamp_ms + 1000 < newer_than_ms {
                let stale = self.pending.pop_front();
                trace!(?stale, "mock camera skipping stale frame");
                continue;
            }
            break;
        }

        match self.pending.pop_front() {
            Some(buffer) => {
                self.acquired += 1;
                self.outstanding.insert(buffer.release_id);
                Ok(Some(buffer))
            },
            None => Ok(None),
        }
    }

    fn release_frame(&mut self, release_id: u32) -> bool {
        let known = self.outstanding.remove(&release_id);
        if known {
            self.released += 1;
        }
        known
    }

    fn set_capture_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        self.format = format;
        self.format_changes.push(format);
        Ok(())
    }

    fn sensor_width(&self) -> u32 {
        self.sensor_width
    }

    fn sensor_height(&self) -> u32 {
        self.sensor_height
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.running = false;
        Ok(())
    }

    fn restart(&mut self) -> Result<(), CameraError> {
        self.running = true;
        self.restarts += 1;
        Ok(())
    }
}
