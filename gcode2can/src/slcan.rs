/*!
slcan (Lawicel ASCII) transport for USB-CAN adapters such as the CANable.

Frames go out as `t<id:3><dlc:1><data>\r`. The adapter acknowledges a
transmit with `z\r` and answers a rejected command with BEL (0x07).
*/

use serialport::SerialPort;
use shared::{CanFrame, MotorResponse, Transport, TransportError, TransportOpener};
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BELL: u8 = 0x07;

/// Longest line an adapter sends (`T` + 8 id + dlc + 16 data + timestamp)
const MAX_LINE_LEN: usize = 64;

/// Bitrate commands understood by slcan firmware
const SLCAN_BITRATES: [(u32, &str); 9] = [
    (10_000, "S0"),
    (20_000, "S1"),
    (50_000, "S2"),
    (100_000, "S3"),
    (125_000, "S4"),
    (250_000, "S5"),
    (500_000, "S6"),
    (750_000, "S7"),
    (1_000_000, "S8"),
];

/// Find the slcan bitrate command for a given bitrate
pub fn find_bitrate_command(bitrate: u32) -> Result<&'static str, TransportError> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| r.to_string()).collect();
            TransportError::Open {
                device: "slcan".to_string(),
                reason: format!("unsupported bitrate {}, valid: {}", bitrate, valid.join(", ")),
            }
        })
}

/// Encode a frame as a standard-id slcan transmit command
pub fn encode_frame(frame: &CanFrame) -> String {
    let data = frame.data();
    let mut cmd = String::with_capacity(5 + data.len() * 2 + 1);
    cmd.push('t');
    cmd.push_str(&format!("{:03X}", frame.arbitration_id() & 0x7FF));
    cmd.push_str(&format!("{:X}", data.len()));
    for byte in &data {
        cmd.push_str(&format!("{:02X}", byte));
    }
    cmd.push('\r');
    cmd
}

/// Parse a received standard data frame line (without the trailing `\r`)
pub fn parse_frame(line: &str) -> Option<(u16, Vec<u8>)> {
    let rest = line.strip_prefix('t')?;
    let id = u16::from_str_radix(rest.get(0..3)?, 16).ok()?;
    let dlc = rest.get(3..4)?.chars().next()?.to_digit(16)? as usize;
    if dlc > 8 {
        return None;
    }

    let data = (0..dlc)
        .map(|i| u8::from_str_radix(rest.get(4 + i * 2..6 + i * 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some((id, data))
}

/// Append a received byte; a line past [`MAX_LINE_LEN`] is dropped first
///
/// Returns whether buffered bytes were discarded.
fn push_line_byte(line_buf: &mut String, byte: u8) -> bool {
    let overflow = line_buf.len() >= MAX_LINE_LEN;
    if overflow {
        line_buf.clear();
    }
    line_buf.push(char::from(byte));
    overflow
}

/// Open connection to an slcan adapter
pub struct SlcanTransport {
    port: Box<dyn SerialPort>,
    name: String,
    line_buf: String,
    open: bool,
}

impl SlcanTransport {
    /// Open the serial port, set the bitrate and open the CAN channel
    pub fn open(device: &str, serial_baud: u32, bitrate: u32) -> Result<Self, TransportError> {
        let bitrate_cmd = find_bitrate_command(bitrate)?;
        let port = serialport::new(device, serial_baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| TransportError::Open {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        let mut transport = Self {
            port,
            name: format!("slcan({})", device),
            line_buf: String::with_capacity(64),
            open: false,
        };

        if let Err(e) = transport.port.clear(serialport::ClearBuffer::All) {
            warn!("Failed to clear {} buffers: {}", transport.name, e);
        }
        // Close any channel left open by a previous session
        transport.command("C")?;
        transport.command(bitrate_cmd)?;
        transport.command("O")?;
        transport.open = true;

        info!("Opened {} at {} bit/s", transport.name, bitrate);
        Ok(transport)
    }

    fn command(&mut self, cmd: &str) -> Result<(), TransportError> {
        self.port.write_all(format!("{}\r", cmd).as_bytes())?;
        self.port.flush()?;
        thread::sleep(Duration::from_millis(50));
        Ok(())
    }
}

impl Transport for SlcanTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_frame(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let cmd = encode_frame(frame);
        self.port
            .write_all(cmd.as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn read_response(&mut self, timeout: Duration) -> Result<Option<MotorResponse>, TransportError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut read_buf = [0u8; 64];

        while deadline.map_or(true, |deadline| Instant::now() < deadline) {
            let count = match self.port.read(&mut read_buf) {
                Ok(count) => count,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            };

            for &byte in &read_buf[..count] {
                match byte {
                    BELL => return Err(TransportError::Rejected),
                    b'\r' | b'\n' => {
                        let line = std::mem::take(&mut self.line_buf);
                        if line.is_empty() || line == "z" || line == "Z" {
                            continue;
                        }
                        match parse_frame(&line).and_then(|(id, data)| MotorResponse::from_can(id, &data)) {
                            Some(response) => return Ok(Some(response)),
                            None => debug!("Ignoring {} line '{}'", self.name, line),
                        }
                    }
                    other => {
                        if push_line_byte(&mut self.line_buf, other) {
                            debug!("Discarded unterminated line from {}", self.name);
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.open {
            self.open = false;
            self.command("C")?;
            info!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Drop for SlcanTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.name, e);
        }
    }
}

/// Opens slcan adapters on serial ports
pub struct SerialOpener {
    serial_baud: u32,
}

impl SerialOpener {
    pub fn new(serial_baud: u32) -> Self {
        Self { serial_baud }
    }
}

impl TransportOpener for SerialOpener {
    fn open(&self, device: &str, bitrate: u32) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SlcanTransport::open(device, self.serial_baud, bitrate)?))
    }
}
