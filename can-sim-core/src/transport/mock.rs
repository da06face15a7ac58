//! In-memory transport
//!
//! Frames queued with [`MockTransport::inject`] are returned by `receive`,
//! every sent frame is recorded. With loopback enabled sent frames are also
//! queued for reception, like a real bus echoes own frames.

use super::CanTransport;
use crate::types::{CanFrame, Result, SimulatorError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

pub struct MockTransport {
    interface: String,
    inbound: Mutex<VecDeque<CanFrame>>,
    available: Condvar,
    sent: Mutex<Vec<CanFrame>>,
    bitrate: AtomicU32,
    fail_sends: AtomicBool,
    loopback: AtomicBool,
}

impl MockTransport {
    pub fn new(bitrate: u32) -> Self {
        Self {
            interface: "mock0".to_string(),
            inbound: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            sent: Mutex::new(Vec::new()),
            bitrate: AtomicU32::new(bitrate),
            fail_sends: AtomicBool::new(false),
            loopback: AtomicBool::new(false),
        }
    }

    pub fn with_loopback(self, enabled: bool) -> Self {
        self.loopback.store(enabled, Ordering::SeqCst);
        self
    }

    /// Queue a frame for the next `receive`
    pub fn inject(&self, frame: CanFrame) {
        self.inbound.lock().push_back(frame);
        self.available.notify_one();
    }

    /// Frames sent so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Make subsequent sends fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_bitrate(&self, bitrate: u32) {
        self.bitrate.store(bitrate, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CanTransport for MockTransport {
    fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        let deadline = Instant::now() + timeout;
        let mut inbound = self.inbound.lock();
        loop {
            if let Some(frame) = inbound.pop_front() {
                return Ok(Some(frame));
            }
            if self.available.wait_until(&mut inbound, deadline).timed_out() {
                return Ok(inbound.pop_front());
            }
        }
    }

    fn send(&self, frame: &CanFrame) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SimulatorError::TransportError(format!(
                "Write to {} failed",
                self.interface
            )));
        }
        self.sent.lock().push(*frame);
        if self.loopback.load(Ordering::SeqCst) {
            self.inject(*frame);
        }
        Ok(())
    }

    fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::SeqCst)
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}
