//! Frame acquisition: polling, staleness guards, format switching and the
//! camera stall watchdog.
//!
//! All timing here runs on the robot clock (milliseconds) passed in by the
//! engine tick, never on wall time, so behavior is reproducible in tests
//! and under simulation.

use argus_camera::{CameraAdapter, ImageBuffer, PixelFormat};
use tracing::{debug, info, warn};

use crate::error::{FaultCode, PipelineError};
use crate::SharedCamera;

/// Timing knobs for acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// No frame for this long means the camera is considered stalled.
    pub stall_timeout_ms: u64,
    /// Pause between stopping a stalled camera and restarting it.
    pub restart_delay_ms: u64,
    /// How long to wait for the first frame in a new format before warning.
    pub format_switch_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: 500,
            restart_delay_ms: 100,
            format_switch_timeout_ms: 1000,
        }
    }
}

/// Phase of an in-flight capture format switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormatState {
    /// No switch pending.
    Idle,
    /// Switch requested; waiting for the worker slot to unlock before
    /// touching the driver (no frame lease may be outstanding).
    WaitingForProcessingToStop,
    /// Driver reconfigured; discarding frames until one arrives with the
    /// new format's geometry.
    WaitingForFrame,
}

/// Stall-recovery escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watchdog {
    Healthy,
    /// Camera stopped at `since_ms`; restart once the delay elapses.
    Stopped { since_ms: u64 },
    /// Camera restarted at `at_ms`; if no frame shows up the pipeline
    /// faults.
    Restarted { at_ms: u64 },
    /// Escalation exhausted. Capture stays inert.
    Faulted,
}

/// Polls the camera and owns every staleness/health decision made before a
/// frame is considered for processing.
pub struct FrameAcquisition {
    camera: SharedCamera,
    config: CaptureConfig,
    capture_enabled: bool,
    power_save: bool,
    sensor_height: u32,
    current_format: PixelFormat,
    desired_format: Option<PixelFormat>,
    format_state: CaptureFormatState,
    waiting_since_ms: Option<u64>,
    last_received_ts: u64,
    frame_period_ms: Option<u64>,
    last_frame_at_ms: Option<u64>,
    watchdog: Watchdog,
}

impl FrameAcquisition {
    pub fn new(camera: SharedCamera, initial_format: PixelFormat, config: CaptureConfig) -> Self {
        let sensor_height = camera.lock().sensor_height();
        Self {
            camera,
            config,
            capture_enabled: true,
            power_save: false,
            sensor_height,
            current_format: initial_format,
            desired_format: None,
            format_state: CaptureFormatState::Idle,
            waiting_since_ms: None,
            last_received_ts: 0,
            frame_period_ms: None,
            last_frame_at_ms: None,
            watchdog: Watchdog::Healthy,
        }
    }

    /// Enable or disable capture. Disabling also resets the stall watchdog
    /// so re-enabling does not immediately trip it.
    pub fn set_capture_enabled(&mut self, enabled: bool) {
        if self.capture_enabled != enabled {
            info!(enabled, "camera capture toggled");
        }
        self.capture_enabled = enabled;
        if !enabled {
            self.reset_watchdog_clock();
        }
    }

    pub fn set_power_save(&mut self, on: bool) {
        if self.power_save != on {
            info!(power_save = on, "camera power save toggled");
        }
        self.power_save = on;
        if on {
            self.reset_watchdog_clock();
        }
    }

    /// Forget the no-frame clock; the next poll restarts it from scratch.
    /// Called whenever capture goes deliberately idle (disable, power
    /// save, pipeline pause) so the stall watchdog does not fire on the
    /// first poll after resuming.
    pub fn reset_watchdog_clock(&mut self) {
        self.last_frame_at_ms = None;
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_enabled && !self.power_save
    }

    pub fn current_format(&self) -> PixelFormat {
        self.current_format
    }

    pub fn format_state(&self) -> CaptureFormatState {
        self.format_state
    }

    /// Observed inter-frame period, once two frames have arrived.
    pub fn frame_period_ms(&self) -> Option<u64> {
        self.frame_period_ms
    }

    pub fn last_received_timestamp(&self) -> u64 {
        self.last_received_ts
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.watchdog, Watchdog::Faulted)
    }

    /// Request a switch to `format`. Returns true if a switch was started.
    ///
    /// A switch to the current format with none in flight is a no-op; a
    /// conflicting request while another switch is in flight is refused.
    pub fn request_format_change(&mut self, format: PixelFormat) -> bool {
        match self.format_state {
            CaptureFormatState::Idle => {
                if format == self.current_format {
                    return false;
                }
            },
            _ => {
                if self.desired_format == Some(format) {
                    return false;
                }
                warn!(
                    requested = %format,
                    in_flight = ?self.desired_format,
                    "capture format change refused while another is in flight"
                );
                return false;
            },
        }
        info!(from = %self.current_format, to = %format, "capture format change requested");
        self.desired_format = Some(format);
        self.format_state = CaptureFormatState::WaitingForProcessingToStop;
        self.waiting_since_ms = None;
        true
    }

    /// Advance the format state machine. Must be told whether any captured
    /// frame lease is still live upstream (the worker slot, or a frame
    /// parked awaiting pose correlation): the driver may only be
    /// reconfigured once none is.
    pub fn update_format_change(&mut self, frame_in_flight: bool, now_ms: u64) {
        match self.format_state {
            CaptureFormatState::Idle => {},
            CaptureFormatState::WaitingForProcessingToStop => {
                if frame_in_flight {
                    return;
                }
                let Some(desired) = self.desired_format else {
                    self.format_state = CaptureFormatState::Idle;
                    return;
                };
                match self.camera.lock().set_capture_format(desired) {
                    Ok(()) => {
                        info!(format = %desired, "camera driver reconfigured; awaiting first frame");
                        self.format_state = CaptureFormatState::WaitingForFrame;
                        self.waiting_since_ms = Some(now_ms);
                    },
                    Err(err) => {
                        warn!(format = %desired, error = %err, "capture format change failed");
                        self.desired_format = None;
                        self.format_state = CaptureFormatState::Idle;
                    },
                }
            },
            CaptureFormatState::WaitingForFrame => {
                if let Some(since) = self.waiting_since_ms {
                    if now_ms.saturating_sub(since) > self.config.format_switch_timeout_ms {
                        warn!(
                            format = ?self.desired_format,
                            waited_ms = now_ms - since,
                            "still waiting for first frame in new capture format"
                        );
                        self.waiting_since_ms = Some(now_ms);
                    }
                }
            },
        }
    }

    /// Poll for one frame, applying the format-switch row gate, the
    /// timestamp regression guard and the stall watchdog.
    pub fn capture(&mut self, now_ms: u64) -> Result<Option<ImageBuffer>, PipelineError> {
        if !self.capture_enabled || self.power_save {
            return Ok(None);
        }
        // The driver must not hand out leases while a reconfigure is
        // pending.
        if self.format_state == CaptureFormatState::WaitingForProcessingToStop {
            return Ok(None);
        }

        let polled = self.camera.lock().frame(self.last_received_ts);
        let buffer = match polled {
            Ok(Some(buffer)) => buffer,
            Ok(None) => return self.handle_no_frame(now_ms),
            Err(err) => {
                // Treated like a missing frame so persistent failure feeds
                // the same stall escalation.
                warn!(error = %err, "camera poll failed");
                return self.handle_no_frame(now_ms);
            },
        };

        if self.format_state == CaptureFormatState::WaitingForFrame {
            let desired = self.desired_format.unwrap_or(self.current_format);
            if buffer.rows == desired.expected_rows(self.sensor_height) {
                info!(format = %desired, rows = buffer.rows, "first frame in new capture format");
                self.current_format = desired;
                self.desired_format = None;
                self.format_state = CaptureFormatState::Idle;
                self.waiting_since_ms = None;
            } else {
                debug!(rows = buffer.rows, "discarding pre-switch frame");
                self.release(&buffer);
                return Ok(None);
            }
        }

        if self.last_received_ts > 0 && buffer.timestamp_ms < self.last_received_ts {
            warn!(
                frame_ts = buffer.timestamp_ms,
                last_ts = self.last_received_ts,
                "frame timestamp went backwards; resetting trackers"
            );
            self.release(&buffer);
            self.last_received_ts = 0;
            self.frame_period_ms = None;
            return Ok(None);
        }

        if self.last_received_ts > 0 {
            self.frame_period_ms = Some(buffer.timestamp_ms - self.last_received_ts);
        }
        self.last_received_ts = buffer.timestamp_ms;
        self.last_frame_at_ms = Some(now_ms);
        self.watchdog = Watchdog::Healthy;
        Ok(Some(buffer))
    }

    /// Return a leased frame to the driver pool.
    pub fn release(&self, buffer: &ImageBuffer) {
        if !self.camera.lock().release_frame(buffer.release_id) {
            warn!(release_id = buffer.release_id, "released an unknown frame lease");
        }
    }

    fn handle_no_frame(&mut self, now_ms: u64) -> Result<Option<ImageBuffer>, PipelineError> {
        let since_last = match self.last_frame_at_ms {
            Some(at) => now_ms.saturating_sub(at),
            None => {
                // First poll after (re)enable: start the clock now.
                self.last_frame_at_ms = Some(now_ms);
                return Ok(None);
            },
        };

        match self.watchdog {
            Watchdog::Healthy => {
                if since_last > self.config.stall_timeout_ms {
                    warn!(since_last_ms = since_last, "no frames from camera; stopping for restart");
                    if let Err(err) = self.camera.lock().stop() {
                        warn!(error = %err, "camera stop failed during stall recovery");
                    }
                    self.watchdog = Watchdog::Stopped { since_ms: now_ms };
                }
            },
            Watchdog::Stopped { since_ms } => {
                if now_ms.saturating_sub(since_ms) > self.config.restart_delay_ms {
                    info!("restarting camera after stall");
                    if let Err(err) = self.camera.lock().restart() {
                        warn!(error = %err, "camera restart failed");
                    }
                    self.watchdog = Watchdog::Restarted { at_ms: now_ms };
                }
            },
            Watchdog::Restarted { at_ms } => {
                if now_ms.saturating_sub(at_ms) > self.config.stall_timeout_ms {
                    warn!("camera produced no frames after restart; faulting");
                    self.watchdog = Watchdog::Faulted;
                    return Err(PipelineError::Fault(FaultCode::CameraStalled));
                }
            },
            Watchdog::Faulted => {},
        }
        Ok(None)
    }
}
