//! The vision pipeline facade: ties subscriptions, scheduling, capture,
//! the worker and result dispatch together under one per-tick entry point.
//!
//! [`VisionPipeline::tick`] is called once per engine tick on the main
//! thread. Everything observable from other threads (the active schedule,
//! counters) is behind lock-free handles; the worker thread only ever
//! touches the mailbox, the camera mutex and the result channel.

use arc_swap::ArcSwap;
use argus_camera::{ImageBuffer, PixelFormat};
use argus_modes::{
    BalancedSchedule, FrequencyRequest, ModeCostTable, ScheduleBalancer, SubscriberId,
    SubscriptionRegistry, VisionMode, VisionModeSet,
};
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureConfig, CaptureFormatState, FrameAcquisition};
use crate::dispatch::{MirrorSink, ResultDispatcher, ResultSinks, VisionProcessingResult};
use crate::error::PipelineError;
use crate::mailbox::Mailbox;
use crate::pose::{Correlation, PoseCorrelator, StateHistory};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::worker::{drain_slot_once, ProcessingWorker, VisionAlgorithms, VisionSystemInput};
use crate::SharedCamera;

const RESULT_CHANNEL_DEPTH: usize = 16;

/// Intrinsic calibration of the camera. Processing stays inert until one
/// is provided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCalibration {
    pub rows: u32,
    pub cols: u32,
    pub focal_length_px: [f32; 2],
    pub center_px: [f32; 2],
}

/// How frames reach the algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Dedicated worker thread (normal operation).
    Asynchronous,
    /// Algorithms run inline inside [`VisionPipeline::tick`]. Used by
    /// tests and factory tooling that need deterministic stepping.
    Synchronous,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// A new frame was pulled off the camera this tick.
    pub captured: bool,
    /// A frame was handed to the algorithms this tick.
    pub submitted: bool,
    pub results_dispatched: usize,
    pub dispatch_failed: bool,
}

/// Top-level vision pipeline.
pub struct VisionPipeline {
    table: ModeCostTable,
    registry: SubscriptionRegistry,
    schedule: ArcSwap<BalancedSchedule>,
    tick: u64,
    camera: SharedCamera,
    acquisition: FrameAcquisition,
    /// Frame waiting for state history to catch up.
    buffered: Option<ImageBuffer>,
    mailbox: Arc<Mailbox<VisionSystemInput>>,
    results_tx: Sender<VisionProcessingResult>,
    dispatcher: ResultDispatcher,
    worker: Option<ProcessingWorker>,
    /// Algorithms held here whenever no worker thread owns them.
    algorithms: Option<Box<dyn VisionAlgorithms>>,
    run_mode: RunMode,
    calibration: Option<CameraCalibration>,
    mirror: Option<Box<dyn MirrorSink>>,
    paused: bool,
    started: bool,
    warned_not_calibrated: bool,
    stats: Arc<PipelineStats>,
}

impl VisionPipeline {
    pub fn new(
        camera: SharedCamera,
        table: ModeCostTable,
        initial_format: PixelFormat,
        capture_config: CaptureConfig,
    ) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::bounded(RESULT_CHANNEL_DEPTH);
        let acquisition = FrameAcquisition::new(camera.clone(), initial_format, capture_config);
        Self {
            table,
            registry: SubscriptionRegistry::new(),
            schedule: ArcSwap::from_pointee(BalancedSchedule::empty()),
            tick: 0,
            camera,
            acquisition,
            buffered: None,
            mailbox: Arc::new(Mailbox::new()),
            results_tx,
            dispatcher: ResultDispatcher::new(results_rx),
            worker: None,
            algorithms: None,
            run_mode: RunMode::Asynchronous,
            calibration: None,
            mirror: None,
            paused: false,
            started: false,
            warned_not_calibrated: false,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Hand the algorithms over and begin processing. In asynchronous mode
    /// this spawns the worker thread.
    pub fn start(&mut self, algorithms: Box<dyn VisionAlgorithms>) {
        if self.started {
            warn!("pipeline started twice; ignoring");
            return;
        }
        match self.run_mode {
            RunMode::Asynchronous => {
                self.worker = Some(ProcessingWorker::spawn(
                    algorithms,
                    Arc::clone(&self.mailbox),
                    self.camera.clone(),
                    self.results_tx.clone(),
                ));
            },
            RunMode::Synchronous => self.algorithms = Some(algorithms),
        }
        self.started = true;
        info!(mode = ?self.run_mode, "vision pipeline started");
    }

    /// Stop processing, releasing any in-flight frame leases. The worker
    /// thread (if any) is joined.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.algorithms = worker.stop();
        }
        if let Some(input) = self.mailbox.abort() {
            self.acquisition.release(&input.buffer);
        }
        if let Some(buffer) = self.buffered.take() {
            self.acquisition.release(&buffer);
        }
        if self.started {
            info!("vision pipeline stopped");
        }
        self.started = false;
    }

    /// Switch between threaded and inline processing. Safe to call while
    /// running; the worker is drained and joined before the switch.
    pub fn set_synchronous(&mut self, synchronous: bool) {
        let target = if synchronous { RunMode::Synchronous } else { RunMode::Asynchronous };
        if target == self.run_mode {
            return;
        }
        if !self.started {
            self.run_mode = target;
            return;
        }
        info!(mode = ?target, "switching pipeline run mode");
        match target {
            RunMode::Synchronous => {
                if let Some(worker) = self.worker.take() {
                    self.algorithms = worker.stop();
                }
                // Anything still in the slot will be drained inline next
                // tick.
            },
            RunMode::Asynchronous => {
                if let Some(algorithms) = self.algorithms.take() {
                    self.worker = Some(ProcessingWorker::spawn(
                        algorithms,
                        Arc::clone(&self.mailbox),
                        self.camera.clone(),
                        self.results_tx.clone(),
                    ));
                }
            },
        }
        self.run_mode = target;
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Suspend capture and handoff. Results already in flight still get
    /// dispatched. The stall watchdog clock is reset so a long pause is
    /// not mistaken for a stalled camera on resume.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!(paused, "pipeline pause toggled");
        }
        if paused && !self.paused {
            self.acquisition.reset_watchdog_clock();
        }
        self.paused = paused;
    }

    pub fn set_calibration(&mut self, calibration: CameraCalibration) {
        self.calibration = Some(calibration);
        self.warned_not_calibrated = false;
    }

    pub fn calibration(&self) -> Option<&CameraCalibration> {
        self.calibration.as_ref()
    }

    pub fn set_mirror_sink(&mut self, sink: Box<dyn MirrorSink>) {
        self.mirror = Some(sink);
    }

    pub fn set_capture_enabled(&mut self, enabled: bool) {
        self.acquisition.set_capture_enabled(enabled);
    }

    pub fn set_power_save(&mut self, on: bool) {
        self.acquisition.set_power_save(on);
    }

    pub fn request_format_change(&mut self, format: PixelFormat) -> bool {
        let requested = self.acquisition.request_format_change(format);
        if requested {
            // A frame parked awaiting pose correlation predates the switch:
            // its geometry is about to become stale and its lease would
            // block the driver reconfigure. Drop it now.
            if let Some(buffer) = self.buffered.take() {
                debug!(frame_ts = buffer.timestamp_ms, "dropping buffered frame for format switch");
                self.acquisition.release(&buffer);
                self.stats.record_dropped_stale();
            }
        }
        requested
    }

    pub fn capture_format_state(&self) -> CaptureFormatState {
        self.acquisition.format_state()
    }

    pub fn frame_period_ms(&self) -> Option<u64> {
        self.acquisition.frame_period_ms()
    }

    /// Replace a subscriber's mode requests wholesale. Recomputes the
    /// schedule only when the aggregate actually changed.
    pub fn set_subscriptions(&mut self, subscriber: SubscriberId, requests: Vec<FrequencyRequest>) {
        if self.registry.set_subscriptions(subscriber, requests) {
            self.refresh_schedule();
        }
    }

    pub fn release_all(&mut self, subscriber: SubscriberId) {
        if self.registry.release_all(subscriber) {
            self.refresh_schedule();
        }
    }

    /// Run `mode` on the next processed frame, schedule or not.
    pub fn request_one_shot(&mut self, mode: VisionMode) {
        self.registry.request_one_shot(mode);
    }

    /// The schedule currently in effect. Lock-free; safe from any thread.
    pub fn schedule(&self) -> Arc<BalancedSchedule> {
        self.schedule.load_full()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn last_processed_timestamp(&self) -> u64 {
        self.dispatcher.last_processed_timestamp()
    }

    /// One engine tick: advance the format state machine, poll the camera,
    /// correlate pose, hand off to the algorithms, drain results.
    ///
    /// `now_ms` is the robot clock driving stall detection and format
    /// switch timeouts.
    pub fn tick(
        &mut self,
        now_ms: u64,
        history: &dyn StateHistory,
        sinks: &mut dyn ResultSinks,
    ) -> Result<TickReport, PipelineError> {
        if !self.started {
            return Err(PipelineError::WorkerNotRunning);
        }
        if self.calibration.is_none() {
            if !self.warned_not_calibrated {
                warn!("no camera calibration set; vision pipeline is inert");
                self.warned_not_calibrated = true;
            }
            return Ok(TickReport::default());
        }

        let tick = self.tick;
        self.tick += 1;

        let mut report = TickReport::default();
        let mut capture_fault = None;

        let frame_in_flight = self.mailbox.is_locked() || self.buffered.is_some();
        self.acquisition.update_format_change(frame_in_flight, now_ms);

        if !self.paused {
            match self.acquisition.capture(now_ms) {
                Ok(Some(buffer)) => {
                    self.stats.record_captured();
                    report.captured = true;
                    if let Some(old) = self.buffered.replace(buffer) {
                        // A newer frame supersedes one still waiting on
                        // state history.
                        debug!(frame_ts = old.timestamp_ms, "superseded buffered frame");
                        self.acquisition.release(&old);
                        self.stats.record_dropped_stale();
                    }
                },
                Ok(None) => {},
                Err(err) => capture_fault = Some(err),
            }

            if let Some(buffer) = self.buffered.take() {
                match PoseCorrelator::correlate(history, buffer.timestamp_ms) {
                    Correlation::Ready(pose) => {
                        report.submitted = self.hand_off(tick, buffer, pose);
                    },
                    Correlation::AwaitState => {
                        self.buffered = Some(buffer);
                    },
                    Correlation::DropTooOld
                    | Correlation::DropOriginMismatch
                    | Correlation::DropLookupFailed => {
                        self.acquisition.release(&buffer);
                        self.stats.record_dropped_stale();
                    },
                }
            }
        }

        let outcome = self.dispatcher.drain(sinks);
        self.stats.record_results_dispatched(outcome.results_handled as u64);
        if outcome.any_handler_failed {
            self.stats.record_handler_failure();
        }
        report.results_dispatched = outcome.results_handled;
        report.dispatch_failed = outcome.any_handler_failed;

        match capture_fault {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Hand a pose-correlated frame to the algorithms. Returns true if the
    /// frame was actually submitted.
    fn hand_off(&mut self, tick: u64, buffer: ImageBuffer, pose: crate::pose::VisionPoseData) -> bool {
        let schedule = self.schedule.load_full();
        let scheduled = schedule.modes_for_tick(tick);
        // One-shots ride on whichever frame goes through next; they are
        // only consumed once the frame really is submitted.
        let modes = scheduled.union(self.registry.pending_one_shots());
        if modes.is_empty() {
            self.acquisition.release(&buffer);
            return false;
        }

        if modes.contains(VisionMode::MirrorMode) {
            if let Some(mirror) = self.mirror.as_mut() {
                mirror.display(&buffer);
            }
        }

        let input = VisionSystemInput {
            buffer,
            pose,
            modes,
            future_modes: schedule.modes_for_tick(tick + 1),
        };

        match self.mailbox.try_submit(input) {
            Ok(()) => {
                let _ = self.registry.take_one_shots();
                self.stats.record_handed_off();
                if self.run_mode == RunMode::Synchronous {
                    if let Some(algorithms) = self.algorithms.as_mut() {
                        drain_slot_once(&mut **algorithms, &self.mailbox, &self.camera, &self.results_tx);
                    }
                }
                true
            },
            Err(input) => {
                // Worker still busy with the previous frame: drop, never
                // queue.
                debug!(frame_ts = input.buffer.timestamp_ms, "worker busy; dropping frame");
                self.acquisition.release(&input.buffer);
                self.stats.record_dropped_busy();
                false
            },
        }
    }

    fn refresh_schedule(&mut self) {
        let frequencies = self.registry.resolve(&self.table);
        let schedule = ScheduleBalancer::compute(&frequencies, &self.table);
        let enabled = schedule.enabled_modes();
        debug!(modes = %enabled, "schedule recomputed");
        self.schedule.store(Arc::new(schedule));
    }

    /// Modes that would run on the given tick under the current schedule,
    /// one-shots excluded.
    pub fn scheduled_modes_for_tick(&self, tick: u64) -> VisionModeSet {
        self.schedule.load_full().modes_for_tick(tick)
    }
}

impl Drop for VisionPipeline {
    fn drop(&mut self) {
        self.stop();
        self.mailbox.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SinkError;
    use crate::pose::{HistPose, PoseLookupError};
    use crate::worker::AlgorithmError;
    use argus_camera::mock::MockCamera;
    use argus_modes::{ModeSetting, ModeTier};
    use parking_lot::Mutex;

    fn uniform_table() -> ModeCostTable {
        let settings = VisionMode::ALL.into_iter().map(|mode| ModeSetting {
            mode,
            low_period: 4,
            med_period: 2,
            high_period: 1,
            standard_period: 2,
            relative_cost: 1.0,
        });
        match ModeCostTable::from_settings(settings) {
            Ok(table) => table,
            Err(err) => panic!("test table invalid: {err}"),
        }
    }

    struct WideOpenHistory;

    impl StateHistory for WideOpenHistory {
        fn oldest_timestamp(&self) -> Option<u64> {
            Some(0)
        }

        fn newest_timestamp(&self) -> Option<u64> {
            Some(u64::MAX)
        }

        fn compute_state_at(&self, timestamp_ms: u64) -> Result<(HistPose, u64), PoseLookupError> {
            Ok((HistPose::default(), timestamp_ms))
        }
    }

    struct EchoAlgorithms;

    impl VisionAlgorithms for EchoAlgorithms {
        fn update(&mut self, input: &VisionSystemInput) -> Result<VisionProcessingResult, AlgorithmError> {
            Ok(VisionProcessingResult {
                timestamp_ms: input.buffer.timestamp_ms,
                modes_processed: input.modes,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct CollectingSinks {
        salient_calls: usize,
    }

    impl ResultSinks for CollectingSinks {
        fn handle_salient_points(
            &mut self,
            _points: &[crate::dispatch::SalientPoint],
        ) -> Result<(), SinkError> {
            self.salient_calls += 1;
            Ok(())
        }
    }

    fn calibration() -> CameraCalibration {
        CameraCalibration {
            rows: 360,
            cols: 640,
            focal_length_px: [290.0, 290.0],
            center_px: [320.0, 180.0],
        }
    }

    fn test_pipeline() -> (Arc<Mutex<MockCamera>>, VisionPipeline) {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let mut pipeline = VisionPipeline::new(
            shared,
            uniform_table(),
            PixelFormat::Rgb888,
            CaptureConfig::default(),
        );
        pipeline.set_synchronous(true);
        pipeline.set_calibration(calibration());
        (camera, pipeline)
    }

    #[test]
    fn test_tick_requires_start() {
        let (_camera, mut pipeline) = test_pipeline();
        let mut sinks = CollectingSinks::default();
        assert!(matches!(
            pipeline.tick(0, &WideOpenHistory, &mut sinks),
            Err(PipelineError::WorkerNotRunning)
        ));
    }

    #[test]
    fn test_uncalibrated_pipeline_is_inert() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let mut pipeline = VisionPipeline::new(
            shared,
            uniform_table(),
            PixelFormat::Rgb888,
            CaptureConfig::default(),
        );
        pipeline.set_synchronous(true);
        pipeline.start(Box::new(EchoAlgorithms));

        camera.lock().push_frame(100);
        let mut sinks = CollectingSinks::default();
        let report = pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(camera.lock().acquired_count(), 0);
    }

    #[test]
    fn test_subscription_enables_processing() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        pipeline.set_subscriptions(
            SubscriberId(1),
            vec![FrequencyRequest { mode: VisionMode::Markers, tier: ModeTier::High }],
        );
        // Markers at High tier runs every tick in the test table.
        assert!(pipeline.scheduled_modes_for_tick(0).contains(VisionMode::Markers));

        let mut sinks = CollectingSinks::default();
        camera.lock().push_frame(100);
        let report = pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();
        assert!(report.captured);
        assert!(report.submitted);
        assert_eq!(report.results_dispatched, 1);

        let stats = pipeline.stats();
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.frames_handed_off, 1);
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }

    #[test]
    fn test_unscheduled_frame_released_without_processing() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        // No subscriptions at all: empty schedule.
        camera.lock().push_frame(100);
        let mut sinks = CollectingSinks::default();
        let report = pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();
        assert!(report.captured);
        assert!(!report.submitted);
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        pipeline.request_one_shot(VisionMode::SaveImages);

        let mut sinks = CollectingSinks::default();
        camera.lock().push_frame(100);
        let report = pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();
        assert!(report.submitted);

        // Consumed: the next frame has no modes and is skipped.
        camera.lock().push_frame(133);
        let report = pipeline.tick(33, &WideOpenHistory, &mut sinks).unwrap();
        assert!(!report.submitted);
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }

    #[test]
    fn test_frame_waits_for_state_history() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        pipeline.set_subscriptions(
            SubscriberId(1),
            vec![FrequencyRequest { mode: VisionMode::Markers, tier: ModeTier::High }],
        );

        struct LaggingHistory {
            newest: u64,
        }
        impl StateHistory for LaggingHistory {
            fn oldest_timestamp(&self) -> Option<u64> {
                Some(0)
            }
            fn newest_timestamp(&self) -> Option<u64> {
                Some(self.newest)
            }
            fn compute_state_at(&self, ts: u64) -> Result<(HistPose, u64), PoseLookupError> {
                Ok((HistPose::default(), ts))
            }
        }

        let mut sinks = CollectingSinks::default();
        camera.lock().push_frame(100);

        // History is behind the frame: buffered, not processed.
        let report = pipeline.tick(0, &LaggingHistory { newest: 50 }, &mut sinks).unwrap();
        assert!(report.captured);
        assert!(!report.submitted);
        assert_eq!(camera.lock().outstanding_leases(), 1);

        // History caught up: the buffered frame goes through.
        let report = pipeline.tick(33, &LaggingHistory { newest: 150 }, &mut sinks).unwrap();
        assert!(!report.captured);
        assert!(report.submitted);
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }

    #[test]
    fn test_pause_stops_capture_but_not_dispatch() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        pipeline.set_paused(true);

        camera.lock().push_frame(100);
        let mut sinks = CollectingSinks::default();
        let report = pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();
        assert!(!report.captured);
        assert_eq!(camera.lock().acquired_count(), 0);

        pipeline.set_paused(false);
        pipeline.request_one_shot(VisionMode::SaveImages);
        let report = pipeline.tick(33, &WideOpenHistory, &mut sinks).unwrap();
        assert!(report.captured);
        assert!(report.submitted);
    }

    #[test]
    fn test_long_pause_does_not_trip_stall_watchdog() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        let mut sinks = CollectingSinks::default();

        // A healthy frame establishes the watchdog clock.
        camera.lock().push_frame(100);
        pipeline.tick(0, &WideOpenHistory, &mut sinks).unwrap();

        pipeline.set_paused(true);
        for now_ms in [1_000, 5_000, 10_000] {
            pipeline.tick(now_ms, &WideOpenHistory, &mut sinks).unwrap();
        }
        pipeline.set_paused(false);

        // First frameless tick after resume only restarts the clock; the
        // camera must not be stopped for a stall it never had.
        pipeline.tick(10_033, &WideOpenHistory, &mut sinks).unwrap();
        assert!(camera.lock().is_running());
        assert_eq!(camera.lock().restart_count(), 0);

        camera.lock().push_frame(10_100);
        let report = pipeline.tick(10_066, &WideOpenHistory, &mut sinks).unwrap();
        assert!(report.captured);
    }

    #[test]
    fn test_stop_releases_buffered_frame() {
        let (camera, mut pipeline) = test_pipeline();
        pipeline.start(Box::new(EchoAlgorithms));
        pipeline.set_subscriptions(
            SubscriberId(1),
            vec![FrequencyRequest { mode: VisionMode::Markers, tier: ModeTier::High }],
        );

        struct EmptyHistory;
        impl StateHistory for EmptyHistory {
            fn oldest_timestamp(&self) -> Option<u64> {
                None
            }
            fn newest_timestamp(&self) -> Option<u64> {
                None
            }
            fn compute_state_at(&self, _ts: u64) -> Result<(HistPose, u64), PoseLookupError> {
                Err(PoseLookupError::OutOfRange)
            }
        }

        let mut sinks = CollectingSinks::default();
        camera.lock().push_frame(100);
        pipeline.tick(0, &EmptyHistory, &mut sinks).unwrap();
        assert_eq!(camera.lock().outstanding_leases(), 1);

        pipeline.stop();
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }
}
