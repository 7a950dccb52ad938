/*!
Transport boundary between the transmitter and a CAN bus.

Physical adapters live with the caller; this crate only needs something
that can put one frame on the bus and hand back the motor's reply.
*/

use crate::error::TransportError;
use crate::frame::{CanFrame, MotionStatus, MotorResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// An open, exclusively owned connection to a CAN bus
pub trait Transport: Send {
    /// Human readable description for logs
    fn name(&self) -> &str;

    /// Put one frame on the bus
    fn write_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a motor reply, `Ok(None)` on timeout
    fn read_response(&mut self, timeout: Duration) -> Result<Option<MotorResponse>, TransportError>;

    /// Release the bus; further writes fail
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens transports by device descriptor and bitrate
pub trait TransportOpener {
    fn open(&self, device: &str, bitrate: u32) -> Result<Box<dyn Transport>, TransportError>;
}

/// In-memory bus with a motor on every channel
///
/// Every written frame is recorded and answered with a
/// [`MotionStatus::Started`] reply. Clones share state, so a test can keep
/// one handle and give the other away.
#[derive(Clone)]
pub struct VirtualTransport {
    inner: Arc<Mutex<VirtualInner>>,
}

struct VirtualInner {
    written: Vec<CanFrame>,
    pending: VecDeque<MotorResponse>,
    respond: bool,
    fail_after: Option<usize>,
    closed: bool,
}

impl VirtualTransport {
    /// Create a new virtual bus that answers every frame
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualInner {
                written: Vec::new(),
                pending: VecDeque::new(),
                respond: true,
                fail_after: None,
                closed: false,
            })),
        }
    }

    /// A bus where no motor ever answers
    pub fn silent() -> Self {
        let transport = Self::new();
        transport.lock().respond = false;
        transport
    }

    /// A bus whose writes fail once `count` frames went through
    pub fn failing_after(count: usize) -> Self {
        let transport = Self::new();
        transport.lock().fail_after = Some(count);
        transport
    }

    /// All frames written so far
    pub fn written(&self) -> Vec<CanFrame> {
        self.lock().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, VirtualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VirtualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for VirtualTransport {
    fn name(&self) -> &str {
        "virtual"
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        let written = inner.written.len();
        if inner.fail_after.is_some_and(|limit| written >= limit) {
            return Err(TransportError::Write("virtual bus write failure".to_string()));
        }

        inner.written.push(*frame);
        if inner.respond {
            inner
                .pending
                .push_back(MotorResponse::new(frame.id(), MotionStatus::Started));
        }
        Ok(())
    }

    fn read_response(&mut self, _timeout: Duration) -> Result<Option<MotorResponse>, TransportError> {
        // Nothing else is on a virtual bus, so an empty queue stays empty
        Ok(self.lock().pending.pop_front())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.closed {
            debug!("Closing virtual bus after {} frame(s)", inner.written.len());
            inner.closed = true;
        }
        Ok(())
    }
}

/// Opener that hands out handles to one shared [`VirtualTransport`]
#[derive(Clone, Default)]
pub struct VirtualOpener {
    bus: VirtualTransport,
}

impl VirtualOpener {
    pub fn new(bus: VirtualTransport) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &VirtualTransport {
        &self.bus
    }
}

impl TransportOpener for VirtualOpener {
    fn open(&self, device: &str, bitrate: u32) -> Result<Box<dyn Transport>, TransportError> {
        info!("Opening virtual CAN bus '{}' at {} bit/s", device, bitrate);
        Ok(Box::new(self.bus.clone()))
    }
}
