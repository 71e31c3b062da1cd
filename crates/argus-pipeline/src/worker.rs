//! Background processing worker.
//!
//! One dedicated thread pulls frames from the [`Mailbox`], runs the vision
//! algorithms, and publishes results over a channel. The frame lease is
//! released the moment the algorithms are done with the pixels, before the
//! result is even sent, so the driver pool is never starved by a slow
//! consumer.

use argus_modes::VisionModeSet;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dispatch::VisionProcessingResult;
use crate::mailbox::Mailbox;
use crate::pose::VisionPoseData;
use crate::SharedCamera;
use argus_camera::{CameraAdapter, ImageBuffer};

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failure inside the vision algorithms for one frame. The frame is
/// dropped; the worker keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("vision algorithm failure: {0}")]
pub struct AlgorithmError(pub String);

/// One frame's worth of work handed to the algorithms.
#[derive(Debug)]
pub struct VisionSystemInput {
    pub buffer: ImageBuffer,
    pub pose: VisionPoseData,
    /// Modes to run on this frame.
    pub modes: VisionModeSet,
    /// Modes scheduled for the following frame, so detectors can prefetch
    /// or keep trackers warm across gaps.
    pub future_modes: VisionModeSet,
}

/// The actual vision algorithms. Owned by the worker thread while running;
/// handed back on [`ProcessingWorker::stop`] so the synchronous path can
/// drive them inline.
pub trait VisionAlgorithms: Send {
    fn update(&mut self, input: &VisionSystemInput) -> Result<VisionProcessingResult, AlgorithmError>;
}

/// Handle to the processing thread.
pub struct ProcessingWorker {
    handle: Option<JoinHandle<Box<dyn VisionAlgorithms>>>,
    running: Arc<AtomicBool>,
}

impl ProcessingWorker {
    /// Spawn the worker thread. It owns `algorithms` until [`Self::stop`].
    pub fn spawn(
        mut algorithms: Box<dyn VisionAlgorithms>,
        mailbox: Arc<Mailbox<VisionSystemInput>>,
        camera: SharedCamera,
        results_tx: Sender<VisionProcessingResult>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("argus-vision".into())
            .spawn(move || {
                info!("vision worker started");
                while running_flag.load(Ordering::Acquire) {
                    let Some(input) = mailbox.recv_begin(RECV_POLL_INTERVAL) else {
                        continue;
                    };
                    process_one(&mut *algorithms, input, &camera, &results_tx);
                    mailbox.finish();
                }
                info!("vision worker stopped");
                algorithms
            })
            .unwrap_or_else(|err| {
                // Thread spawn only fails on resource exhaustion; nothing
                // sensible to do but abort startup.
                panic!("failed to spawn vision worker thread: {err}")
            });

        Self { handle: Some(handle), running }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the thread to exit and join it, recovering the algorithms.
    pub fn stop(mut self) -> Option<Box<dyn VisionAlgorithms>> {
        self.running.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(algorithms) => Some(algorithms),
                Err(_) => {
                    error!("vision worker thread panicked");
                    None
                },
            },
            None => None,
        }
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Run the algorithms on one input, releasing the frame lease on every
/// path. Shared by the worker thread and the synchronous in-tick path.
pub(crate) fn process_one(
    algorithms: &mut dyn VisionAlgorithms,
    input: VisionSystemInput,
    camera: &SharedCamera,
    results_tx: &Sender<VisionProcessingResult>,
) {
    if input.buffer.is_empty() {
        warn!(
            frame_ts = input.buffer.timestamp_ms,
            "empty frame reached the worker; releasing without processing"
        );
        release_buffer(camera, &input.buffer);
        return;
    }

    let outcome = algorithms.update(&input);
    release_buffer(camera, &input.buffer);

    match outcome {
        Ok(result) => match results_tx.try_send(result) {
            Ok(()) => {},
            Err(TrySendError::Full(result)) => {
                debug!(result_ts = result.timestamp_ms, "result channel full; dropping result");
            },
            Err(TrySendError::Disconnected(_)) => {
                debug!("result channel disconnected");
            },
        },
        Err(err) => {
            warn!(frame_ts = input.buffer.timestamp_ms, error = %err, "frame processing failed");
        },
    }
}

/// Drive at most one pending mailbox entry inline. Synchronous-mode helper.
pub(crate) fn drain_slot_once(
    algorithms: &mut dyn VisionAlgorithms,
    mailbox: &Mailbox<VisionSystemInput>,
    camera: &SharedCamera,
    results_tx: &Sender<VisionProcessingResult>,
) {
    if let Some(input) = mailbox.begin() {
        process_one(algorithms, input, camera, results_tx);
        mailbox.finish();
    }
}

fn release_buffer(camera: &SharedCamera, buffer: &ImageBuffer) {
    if !camera.lock().release_frame(buffer.release_id) {
        warn!(release_id = buffer.release_id, "worker released an unknown frame lease");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_camera::mock::MockCamera;
    use argus_camera::{CameraAdapter, PixelFormat};
    use argus_modes::VisionMode;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;

    struct CountingAlgorithms {
        fail: bool,
        processed: u64,
    }

    impl VisionAlgorithms for CountingAlgorithms {
        fn update(&mut self, input: &VisionSystemInput) -> Result<VisionProcessingResult, AlgorithmError> {
            self.processed += 1;
            if self.fail {
                return Err(AlgorithmError("detector exploded".into()));
            }
            Ok(VisionProcessingResult {
                timestamp_ms: input.buffer.timestamp_ms,
                modes_processed: input.modes,
                ..Default::default()
            })
        }
    }

    fn leased_input(camera: &Arc<Mutex<MockCamera>>, timestamp_ms: u64) -> VisionSystemInput {
        camera.lock().push_frame(timestamp_ms);
        let buffer = camera.lock().frame(0).unwrap().unwrap();
        VisionSystemInput {
            buffer,
            pose: VisionPoseData::default(),
            modes: [VisionMode::Markers].into_iter().collect(),
            future_modes: VisionModeSet::default(),
        }
    }

    #[test]
    fn test_worker_processes_and_releases() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let mailbox = Arc::new(Mailbox::new());
        let (tx, rx) = unbounded();

        let worker = ProcessingWorker::spawn(
            Box::new(CountingAlgorithms { fail: false, processed: 0 }),
            Arc::clone(&mailbox),
            shared,
            tx,
        );

        let input = leased_input(&camera, 100);
        mailbox.try_submit(input).unwrap();

        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.timestamp_ms, 100);
        assert!(result.modes_processed.contains(VisionMode::Markers));

        // Lease returned even though the result is still queued downstream.
        assert_eq!(camera.lock().outstanding_leases(), 0);

        let algorithms = worker.stop().expect("algorithms handed back");
        drop(algorithms);
        assert!(!mailbox.is_locked());
    }

    #[test]
    fn test_failed_frame_still_releases_lease() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let (tx, rx) = unbounded();

        let mut algorithms = CountingAlgorithms { fail: true, processed: 0 };
        let input = leased_input(&camera, 50);
        process_one(&mut algorithms, input, &shared, &tx);

        assert_eq!(algorithms.processed, 1);
        assert_eq!(camera.lock().outstanding_leases(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_buffer_skips_algorithms() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let (tx, rx) = unbounded();

        camera.lock().push_empty_frame(10);
        let buffer = camera.lock().frame(0).unwrap().unwrap();
        let input = VisionSystemInput {
            buffer,
            pose: VisionPoseData::default(),
            modes: VisionModeSet::default(),
            future_modes: VisionModeSet::default(),
        };

        let mut algorithms = CountingAlgorithms { fail: false, processed: 0 };
        process_one(&mut algorithms, input, &shared, &tx);

        assert_eq!(algorithms.processed, 0);
        assert_eq!(camera.lock().outstanding_leases(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drain_slot_once_runs_inline() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let mailbox = Mailbox::new();
        let (tx, rx) = unbounded();

        let input = leased_input(&camera, 77);
        mailbox.try_submit(input).unwrap();

        let mut algorithms = CountingAlgorithms { fail: false, processed: 0 };
        drain_slot_once(&mut algorithms, &mailbox, &shared, &tx);

        assert_eq!(rx.try_recv().unwrap().timestamp_ms, 77);
        assert!(!mailbox.is_locked());
        assert_eq!(camera.lock().outstanding_leases(), 0);
    }

    #[test]
    fn test_stop_recovers_algorithms() {
        let camera = Arc::new(Mutex::new(MockCamera::new(1280, 720, PixelFormat::Rgb888)));
        let shared: SharedCamera = camera.clone();
        let mailbox = Arc::new(Mailbox::new());
        let (tx, _rx) = unbounded();

        let worker = ProcessingWorker::spawn(
            Box::new(CountingAlgorithms { fail: false, processed: 0 }),
            Arc::clone(&mailbox),
            shared,
            tx,
        );
        assert!(worker.is_running());
        assert!(worker.stop().is_some());
    }
}
