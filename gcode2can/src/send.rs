/*!
Sending `.can` files to the bus.

The send runs on its own worker thread, which owns the transport for the
whole session. The calling thread prints progress events as they arrive and
owns the Ctrl+C handler, which only flips the cancel token.
*/

use crate::config::TransmitConfig;
use crate::slcan::SerialOpener;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use shared::can_file::format_frame;
use shared::{send_file, CancelToken, TransmitEvent, TransmitReport, TransportOpener, VirtualOpener};
use std::path::PathBuf;
use std::thread;
use tracing::info;

/// Pick the transport implementation for this session
pub fn opener_for(config: &TransmitConfig) -> Box<dyn TransportOpener + Send> {
    if config.use_virtual {
        info!("Using virtual CAN bus");
        Box::new(VirtualOpener::default())
    } else {
        Box::new(SerialOpener::new(config.serial_baud))
    }
}

/// Run a send to completion, printing progress; returns the final report
pub fn run_send(
    path: PathBuf,
    config: &TransmitConfig,
    opener: Box<dyn TransportOpener + Send>,
    cancel: CancelToken,
    quiet: bool,
) -> Result<TransmitReport> {
    let options = config
        .send_options()
        .context("Invalid transmit configuration")?;
    let (events_tx, events_rx) = unbounded::<TransmitEvent>();
    let display_path = path.display().to_string();

    let worker = thread::spawn(move || {
        send_file(&path, opener.as_ref(), &options, &cancel, Some(events_tx))
    });

    print_events(events_rx, quiet);

    let result = worker
        .join()
        .map_err(|_| anyhow!("Send worker thread panicked"))?;
    result.with_context(|| format!("Failed to send {}", display_path))
}

/// Drain progress events until the worker drops its sender
fn print_events(events: Receiver<TransmitEvent>, quiet: bool) {
    for event in events.iter() {
        if quiet {
            continue;
        }
        match event {
            TransmitEvent::FrameSent { index, frame } => {
                println!("📤 Sent #{}: {}", index + 1, format_frame(&frame));
            }
            TransmitEvent::Response { response, .. } => {
                println!("📥 Motor {} replied {:?}", response.id, response.status);
            }
            TransmitEvent::Cancelled { sent } => {
                println!("🛑 Stopped after {} frame(s)", sent);
            }
            TransmitEvent::Finished { sent } => {
                println!("✅ All {} frame(s) sent", sent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{write_can_file, AxisId, CanFrame, SharedError, VirtualTransport};
    use tempfile::TempDir;

    fn write_frames(dir: &TempDir, count: usize) -> PathBuf {
        let frames: Vec<CanFrame> = (0..count)
            .map(|i| CanFrame::absolute(AxisId::ALL[i % 6], 600, 2, i as i32).unwrap())
            .collect();
        let path = dir.path().join("job.can");
        write_can_file(&path, &frames).unwrap();
        path
    }

    fn virtual_config() -> TransmitConfig {
        TransmitConfig {
            use_virtual: true,
            ..TransmitConfig::default()
        }
    }

    #[test]
    fn test_send_over_virtual_bus() {
        let dir = TempDir::new().unwrap();
        let path = write_frames(&dir, 12);
        let bus = VirtualTransport::new();
        let opener = Box::new(VirtualOpener::new(bus.clone()));

        let report = run_send(path, &virtual_config(), opener, CancelToken::new(), true).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.sent, 12);
        assert_eq!(bus.written().len(), 12);
        assert!(bus.is_closed());
    }

    #[test]
    fn test_cancelled_send_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_frames(&dir, 5);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = run_send(path, &virtual_config(), opener_for(&virtual_config()), cancel, true).unwrap();

        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
    }

    #[test]
    fn test_send_error_keeps_partial_count() {
        let dir = TempDir::new().unwrap();
        let path = write_frames(&dir, 5);
        let opener = Box::new(VirtualOpener::new(VirtualTransport::failing_after(3)));

        let err = run_send(path, &virtual_config(), opener, CancelToken::new(), true).unwrap_err();
        let shared_err = err.downcast_ref::<SharedError>().unwrap();
        assert_eq!(shared_err.frames_sent(), Some(3));
    }

    #[test]
    fn test_infinite_timeout_is_rejected_before_sending() {
        let dir = TempDir::new().unwrap();
        let path = write_frames(&dir, 2);
        let bus = VirtualTransport::new();
        let config = TransmitConfig {
            timeout_seconds: f64::INFINITY,
            ..virtual_config()
        };

        let err = run_send(path, &config, Box::new(VirtualOpener::new(bus.clone())), CancelToken::new(), true)
            .unwrap_err();

        assert!(err.to_string().contains("Invalid transmit configuration"));
        assert!(bus.written().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = run_send(
            PathBuf::from("/nonexistent/job.can"),
            &virtual_config(),
            opener_for(&virtual_config()),
            CancelToken::new(),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to send"));
    }
}
