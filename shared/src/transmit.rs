/*!
Paced, cancellable frame transmission.

Frames go out strictly in sequence order on a single transport. There is no
retry: a frame that fails to go out, or goes out without a reply from its
own motor, aborts the send. Replies from other motors (a late "completed"
for an earlier move) are tallied but do not count as the awaited reply.
Cancellation is checked between frames, never in the middle of one.
*/

use crate::can_file::read_can_file;
use crate::error::{Result, SharedError, TransportError};
use crate::frame::{CanFrame, MotionStatus, MotorResponse};
use crate::transport::{Transport, TransportOpener};
use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative stop flag shared between the sender and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How frames are spaced on the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    /// How long to wait for a reply after each frame, `None` to not wait
    pub response_timeout: Option<Duration>,
    /// Pause between consecutive frames
    pub inter_frame_delay: Duration,
}

impl PacingPolicy {
    /// Policy from a timeout in seconds; zero or less disables waiting
    pub fn from_timeout_secs(seconds: f64) -> Result<Self> {
        if seconds.is_nan() {
            return Err(SharedError::config("response timeout is not a number"));
        }
        let response_timeout = if seconds > 0.0 {
            let timeout = Duration::try_from_secs_f64(seconds).map_err(|_| {
                SharedError::config(format!("response timeout of {} s is out of range", seconds))
            })?;
            Some(timeout)
        } else {
            None
        };

        Ok(Self {
            response_timeout,
            ..Self::default()
        })
    }

    pub fn with_inter_frame_delay(mut self, delay: Duration) -> Self {
        self.inter_frame_delay = delay;
        self
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(3)),
            inter_frame_delay: Duration::ZERO,
        }
    }
}

/// Progress notifications for a UI or log
#[derive(Debug, Clone, PartialEq)]
pub enum TransmitEvent {
    FrameSent { index: usize, frame: CanFrame },
    Response { index: usize, response: MotorResponse },
    Cancelled { sent: usize },
    Finished { sent: usize },
}

/// Replies seen during a send, by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseTally {
    pub failed: usize,
    pub started: usize,
    pub completed: usize,
    pub limit_stopped: usize,
    pub unknown: usize,
}

impl ResponseTally {
    fn record(&mut self, status: MotionStatus) {
        match status {
            MotionStatus::Failed => self.failed += 1,
            MotionStatus::Started => self.started += 1,
            MotionStatus::Completed => self.completed += 1,
            MotionStatus::LimitStopped => self.limit_stopped += 1,
            MotionStatus::Unknown(_) => self.unknown += 1,
        }
    }
}

/// Outcome of a send that was not aborted by an error
#[derive(Debug, Clone, Serialize)]
pub struct TransmitReport {
    pub sent: usize,
    pub total: usize,
    pub cancelled: bool,
    pub responses: ResponseTally,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl TransmitReport {
    fn new(total: usize) -> Self {
        let now = Local::now();
        Self {
            sent: 0,
            total,
            cancelled: false,
            responses: ResponseTally::default(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.sent == self.total
    }

    /// Pretty JSON summary
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Sends frame sequences over a transport
pub struct Transmitter {
    pacing: PacingPolicy,
    events: Option<Sender<TransmitEvent>>,
}

impl Transmitter {
    pub fn new(pacing: PacingPolicy) -> Self {
        Self {
            pacing,
            events: None,
        }
    }

    /// Report progress on a channel as frames go out
    pub fn with_events(mut self, events: Sender<TransmitEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: TransmitEvent) {
        if let Some(events) = &self.events {
            // A receiver that went away only loses progress updates
            let _ = events.send(event);
        }
    }

    /// Read replies until the motor addressed by `frame` answers
    ///
    /// Every reply is tallied and reported, whichever motor sent it.
    fn await_reply(
        &self,
        transport: &mut dyn Transport,
        index: usize,
        frame: &CanFrame,
        timeout: Duration,
        report: &mut TransmitReport,
    ) -> Result<MotorResponse> {
        let timed_out = |sent: usize| SharedError::transport(sent, TransportError::Timeout(timeout));
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };

            let response = transport
                .read_response(remaining)
                .map_err(|e| SharedError::transport(report.sent, e))?
                .ok_or_else(|| timed_out(report.sent))?;

            if matches!(response.status, MotionStatus::Failed | MotionStatus::LimitStopped) {
                warn!("Motor {} reported {:?}", response.id, response.status);
            }
            report.responses.record(response.status);
            self.emit(TransmitEvent::Response { index, response });

            if response.id == frame.id() {
                return Ok(response);
            }
            debug!("Reply from channel {} while waiting for {}", response.id, frame.id());
            if remaining.is_zero() {
                return Err(timed_out(report.sent));
            }
        }
    }

    /// Send `frames` in order
    ///
    /// Errors are [`SharedError::Transport`] carrying how many frames were
    /// already written. Cancellation is not an error: the report comes back
    /// with `cancelled` set.
    pub fn transmit(
        &self,
        frames: &[CanFrame],
        transport: &mut dyn Transport,
        cancel: &CancelToken,
    ) -> Result<TransmitReport> {
        let mut report = TransmitReport::new(frames.len());
        info!("Sending {} frame(s) over {}", frames.len(), transport.name());

        for (index, frame) in frames.iter().enumerate() {
            if index > 0 && !self.pacing.inter_frame_delay.is_zero() {
                thread::sleep(self.pacing.inter_frame_delay);
            }

            if cancel.is_cancelled() {
                warn!("Send cancelled after {} of {} frame(s)", report.sent, report.total);
                report.cancelled = true;
                self.emit(TransmitEvent::Cancelled { sent: report.sent });
                break;
            }

            transport
                .write_frame(frame)
                .map_err(|e| SharedError::transport(report.sent, e))?;
            report.sent += 1;
            debug!("Sent frame {}: id={} position={}", index, frame.id(), frame.position());
            self.emit(TransmitEvent::FrameSent {
                index,
                frame: *frame,
            });

            let Some(timeout) = self.pacing.response_timeout else {
                continue;
            };

            self.await_reply(transport, index, frame, timeout, &mut report)?;
        }

        report.finished_at = Local::now();
        if !report.cancelled {
            info!("Sent {} frame(s)", report.sent);
            self.emit(TransmitEvent::Finished { sent: report.sent });
        }
        Ok(report)
    }
}

/// Where and how to send a `.can` file
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub device: String,
    pub bitrate: u32,
    pub pacing: PacingPolicy,
}

/// Read a `.can` file and send it through a freshly opened transport
///
/// The transport is closed before returning whether the send completed,
/// failed or was cancelled.
pub fn send_file<P: AsRef<Path>>(
    path: P,
    opener: &dyn TransportOpener,
    options: &SendOptions,
    cancel: &CancelToken,
    events: Option<Sender<TransmitEvent>>,
) -> Result<TransmitReport> {
    let frames = read_can_file(path.as_ref())?;
    info!("Loaded {} frame(s) from {}", frames.len(), path.as_ref().display());

    let mut transport = opener
        .open(&options.device, options.bitrate)
        .map_err(|e| SharedError::transport(0, e))?;

    let mut transmitter = Transmitter::new(options.pacing);
    if let Some(events) = events {
        transmitter = transmitter.with_events(events);
    }

    let result = transmitter.transmit(&frames, &mut *transport, cancel);
    if let Err(e) = transport.close() {
        warn!("Failed to close {}: {}", transport.name(), e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisId;
    use crate::can_file::write_can_file;
    use crate::transport::{VirtualOpener, VirtualTransport};
    use std::collections::VecDeque;
    use tempfile::NamedTempFile;

    fn sample_frames(count: usize) -> Vec<CanFrame> {
        (0..count)
            .map(|i| {
                let axis = AxisId::ALL[i % 6];
                CanFrame::absolute(axis, 600, 2, i as i32 * 100).unwrap()
            })
            .collect()
    }

    /// Virtual bus that trips the cancel token after a number of writes
    struct CancellingTransport {
        bus: VirtualTransport,
        cancel: CancelToken,
        after: usize,
    }

    impl Transport for CancellingTransport {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn write_frame(&mut self, frame: &CanFrame) -> std::result::Result<(), TransportError> {
            self.bus.write_frame(frame)?;
            if self.bus.written().len() == self.after {
                self.cancel.cancel();
            }
            Ok(())
        }

        fn read_response(
            &mut self,
            timeout: Duration,
        ) -> std::result::Result<Option<MotorResponse>, TransportError> {
            self.bus.read_response(timeout)
        }
    }

    /// Bus where each motor answers with its own scripted replies
    struct ScriptedTransport {
        replies: Vec<(u8, Vec<MotionStatus>)>,
        pending: VecDeque<MotorResponse>,
        written: usize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<(u8, Vec<MotionStatus>)>) -> Self {
            Self {
                replies,
                pending: VecDeque::new(),
                written: 0,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn write_frame(&mut self, frame: &CanFrame) -> std::result::Result<(), TransportError> {
            self.written += 1;
            if let Some((id, statuses)) = self.replies.iter().find(|(id, _)| *id == frame.id()) {
                self.pending
                    .extend(statuses.iter().map(|status| MotorResponse::new(*id, *status)));
            }
            Ok(())
        }

        fn read_response(
            &mut self,
            _timeout: Duration,
        ) -> std::result::Result<Option<MotorResponse>, TransportError> {
            Ok(self.pending.pop_front())
        }
    }

    #[test]
    fn test_sends_everything_in_order() {
        let frames = sample_frames(8);
        let mut bus = VirtualTransport::new();
        let report = Transmitter::new(PacingPolicy::default())
            .transmit(&frames, &mut bus, &CancelToken::new())
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.sent, 8);
        assert_eq!(report.responses.started, 8);
        assert_eq!(bus.written(), frames);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"sent\": 8"));
        assert!(json.contains("\"cancelled\": false"));
    }

    #[test]
    fn test_cancel_after_n_frames() {
        let frames = sample_frames(10);
        let cancel = CancelToken::new();
        let bus = VirtualTransport::new();
        let mut transport = CancellingTransport {
            bus: bus.clone(),
            cancel: cancel.clone(),
            after: 4,
        };

        let report = Transmitter::new(PacingPolicy::default())
            .transmit(&frames, &mut transport, &cancel)
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.sent, 4);
        assert_eq!(bus.written(), frames[..4].to_vec());
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut bus = VirtualTransport::new();
        let report = Transmitter::new(PacingPolicy::default())
            .transmit(&sample_frames(3), &mut bus, &cancel)
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
        assert!(bus.written().is_empty());
    }

    #[test]
    fn test_missing_response_is_timeout() {
        let mut bus = VirtualTransport::silent();
        let pacing = PacingPolicy::from_timeout_secs(0.01).unwrap();
        let err = Transmitter::new(pacing)
            .transmit(&sample_frames(3), &mut bus, &CancelToken::new())
            .unwrap_err();

        assert_eq!(err.frames_sent(), Some(1));
        assert!(matches!(
            err,
            SharedError::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        ));
        assert_eq!(bus.written().len(), 1);
    }

    #[test]
    fn test_reply_from_other_motor_is_not_an_ack() {
        // X answers twice, Y never answers
        let mut bus = ScriptedTransport::new(vec![(
            1,
            vec![MotionStatus::Started, MotionStatus::Completed],
        )]);
        let frames = sample_frames(2);
        let err = Transmitter::new(PacingPolicy::from_timeout_secs(0.01).unwrap())
            .transmit(&frames, &mut bus, &CancelToken::new())
            .unwrap_err();

        assert_eq!(bus.written, 2);
        assert_eq!(err.frames_sent(), Some(2));
        assert!(matches!(
            err,
            SharedError::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        ));
    }

    #[test]
    fn test_late_replies_are_tallied() {
        let mut bus = ScriptedTransport::new(vec![
            (1, vec![MotionStatus::Started, MotionStatus::Completed]),
            (2, vec![MotionStatus::Started]),
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let report = Transmitter::new(PacingPolicy::default())
            .with_events(tx)
            .transmit(&sample_frames(2), &mut bus, &CancelToken::new())
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.responses.started, 2);
        assert_eq!(report.responses.completed, 1);

        let replies: Vec<(usize, u8)> = rx
            .try_iter()
            .filter_map(|event| match event {
                TransmitEvent::Response { index, response } => Some((index, response.id)),
                _ => None,
            })
            .collect();
        assert_eq!(replies, vec![(0, 1), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_timeout_out_of_range() {
        assert!(PacingPolicy::from_timeout_secs(f64::INFINITY).is_err());
        assert!(PacingPolicy::from_timeout_secs(1e20).is_err());
        assert!(PacingPolicy::from_timeout_secs(f64::NAN).is_err());
        assert_eq!(PacingPolicy::from_timeout_secs(-1.0).unwrap().response_timeout, None);
        assert_eq!(
            PacingPolicy::from_timeout_secs(1.5).unwrap().response_timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_no_timeout_means_no_wait() {
        let mut bus = VirtualTransport::silent();
        let report = Transmitter::new(PacingPolicy::from_timeout_secs(0.0).unwrap())
            .transmit(&sample_frames(3), &mut bus, &CancelToken::new())
            .unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.responses, ResponseTally::default());
    }

    #[test]
    fn test_write_failure_reports_partial_count() {
        let mut bus = VirtualTransport::failing_after(2);
        let err = Transmitter::new(PacingPolicy::default())
            .transmit(&sample_frames(5), &mut bus, &CancelToken::new())
            .unwrap_err();

        assert_eq!(err.frames_sent(), Some(2));
        assert_eq!(bus.written().len(), 2);
    }

    #[test]
    fn test_progress_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut bus = VirtualTransport::new();
        Transmitter::new(PacingPolicy::default())
            .with_events(tx)
            .transmit(&sample_frames(2), &mut bus, &CancelToken::new())
            .unwrap();

        let events: Vec<TransmitEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], TransmitEvent::FrameSent { index: 0, .. }));
        assert!(matches!(events[1], TransmitEvent::Response { index: 0, .. }));
        assert_eq!(events[4], TransmitEvent::Finished { sent: 2 });
    }

    #[test]
    fn test_send_file_closes_transport() {
        let frames = sample_frames(6);
        let temp_file = NamedTempFile::new().unwrap();
        write_can_file(temp_file.path(), &frames).unwrap();

        let opener = VirtualOpener::default();
        let options = SendOptions {
            device: "vcan0".to_string(),
            bitrate: 500_000,
            pacing: PacingPolicy::default(),
        };
        let report = send_file(temp_file.path(), &opener, &options, &CancelToken::new(), None).unwrap();

        assert_eq!(report.sent, 6);
        assert_eq!(opener.bus().written(), frames);
        assert!(opener.bus().is_closed());
    }

    #[test]
    fn test_send_file_closes_transport_on_error() {
        let temp_file = NamedTempFile::new().unwrap();
        write_can_file(temp_file.path(), &sample_frames(4)).unwrap();

        let opener = VirtualOpener::new(VirtualTransport::failing_after(1));
        let options = SendOptions {
            device: "vcan0".to_string(),
            bitrate: 500_000,
            pacing: PacingPolicy::default(),
        };
        let err = send_file(temp_file.path(), &opener, &options, &CancelToken::new(), None).unwrap_err();

        assert_eq!(err.frames_sent(), Some(1));
        assert!(opener.bus().is_closed());
    }
}
