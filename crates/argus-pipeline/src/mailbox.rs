//! Single-slot handoff between the engine tick and the processing worker.
//!
//! The slot is deliberately depth-one: while the worker is busy, newly
//! captured frames are dropped at submission rather than queued, so the
//! worker always sees the freshest frame and latency never accumulates.
//! The slot stays *locked* from submission until the worker finishes,
//! which is what the capture format state machine keys off.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
enum SlotState<T> {
    /// Nothing pending; submission allowed.
    Empty,
    /// Submitted, not yet picked up by the worker.
    Full(T),
    /// Picked up; the worker is running on it.
    Processing,
}

#[derive(Debug)]
struct Inner<T> {
    slot: SlotState<T>,
    closed: bool,
}

/// Depth-one mailbox with drop-on-busy semantics.
#[derive(Debug)]
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { slot: SlotState::Empty, closed: false }),
            available: Condvar::new(),
        }
    }

    /// Submit `value` if the slot is free. On a busy or closed slot the
    /// value is handed back so the caller can release its resources.
    pub fn try_submit(&self, value: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed || !matches!(inner.slot, SlotState::Empty) {
            return Err(value);
        }
        inner.slot = SlotState::Full(value);
        self.available.notify_one();
        Ok(())
    }

    /// True from submission until [`Self::finish`] (or [`Self::abort`]).
    pub fn is_locked(&self) -> bool {
        !matches!(self.inner.lock().slot, SlotState::Empty)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Take a pending value without blocking, transitioning the slot to
    /// `Processing`. Used by the synchronous path.
    pub fn begin(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.slot, SlotState::Processing) {
            SlotState::Full(value) => Some(value),
            other => {
                inner.slot = other;
                None
            },
        }
    }

    /// Block up to `timeout` for a pending value, transitioning the slot to
    /// `Processing` when one arrives. Returns `None` on timeout or close.
    pub fn recv_begin(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let SlotState::Full(_) = inner.slot {
                if let SlotState::Full(value) = std::mem::replace(&mut inner.slot, SlotState::Processing) {
                    return Some(value);
                }
                unreachable!("slot state changed under lock");
            }
            if inner.closed {
                return None;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                return None;
            }
        }
    }

    /// Mark processing complete and unlock the slot.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.slot, SlotState::Processing) {
            inner.slot = SlotState::Empty;
        }
    }

    /// Reclaim a value that was submitted but never picked up. Used on
    /// shutdown so the frame lease inside can be released.
    pub fn abort(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.slot, SlotState::Empty) {
            SlotState::Full(value) => Some(value),
            _ => None,
        }
    }

    /// Refuse further submissions and wake any blocked receiver.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_submit_then_begin_then_finish() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.is_locked());

        mailbox.try_submit(7u32).unwrap();
        assert!(mailbox.is_locked());

        assert_eq!(mailbox.begin(), Some(7));
        // Still locked while processing.
        assert!(mailbox.is_locked());
        assert!(mailbox.try_submit(8).is_err());

        mailbox.finish();
        assert!(!mailbox.is_locked());
        mailbox.try_submit(8).unwrap();
    }

    #[test]
    fn test_busy_slot_rejects_submission() {
        let mailbox = Mailbox::new();
        mailbox.try_submit(1u32).unwrap();
        assert_eq!(mailbox.try_submit(2), Err(2));
    }

    #[test]
    fn test_abort_reclaims_pending_value() {
        let mailbox = Mailbox::new();
        mailbox.try_submit(5u32).unwrap();
        assert_eq!(mailbox.abort(), Some(5));
        assert!(!mailbox.is_locked());
        assert_eq!(mailbox.abort(), None);
    }

    #[test]
    fn test_recv_begin_times_out_when_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.recv_begin(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_recv_begin_wakes_on_submit() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = Arc::clone(&mailbox);
        let handle = std::thread::spawn(move || receiver.recv_begin(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(20));
        mailbox.try_submit(42u32).unwrap();
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn test_closed_mailbox_rejects_and_wakes() {
        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        let receiver = Arc::clone(&mailbox);
        let handle = std::thread::spawn(move || receiver.recv_begin(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert_eq!(handle.join().unwrap(), None);
        assert_eq!(mailbox.try_submit(1), Err(1));
    }
}
