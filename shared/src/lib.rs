/*!
# Shared Types and Utilities

Core of the G-code to Makerbase CAN toolchain: everything between a line of
G-code and a frame on the bus, independent of how the bus is reached.

## Core Types

- [`AxisId`] / [`AxisTable`] - axis channels and gear ratios
- [`MotionCommand`] - one parsed G-code line
- [`CanFrame`] / [`FrameSequence`] - absolute-position frames
- [`Encoder`] - G-code to frames
- [`Transmitter`] - frames to a [`Transport`]

## Modules

- [`gcode`] - G-code tokenizing
- [`encoder`] - fixed-point conversion and batch conversion
- [`can_file`] - `.can` text format
- [`transport`] - transport boundary and the in-memory transport
- [`transmit`] - paced, cancellable sending
- [`error`] - Common error types
*/

pub mod axis;
pub mod can_file;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod gcode;
pub mod transmit;
pub mod transport;

// Re-export commonly used types
pub use axis::{AxisId, AxisTable};
pub use can_file::{parse_can_text, read_can_file, serialize, write_can_file};
pub use encoder::{convert_directory, convert_file, DirectoryConversion, Encoder, EncoderSettings};
pub use error::{ParseErrorKind, Result, SharedError, TransportError};
pub use frame::{CanFrame, FrameSequence, MotionStatus, MotorResponse};
pub use gcode::{parse_line, CommandWord, MotionCommand};
pub use transmit::{send_file, CancelToken, PacingPolicy, SendOptions, TransmitEvent, TransmitReport, Transmitter};
pub use transport::{Transport, TransportOpener, VirtualOpener, VirtualTransport};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Size of an encoded frame in bytes, arbitration id included
    pub const FRAME_LEN: usize = 9;

    /// Mode byte for "run to absolute position"
    pub const MODE_ABSOLUTE: u8 = 0xF5;

    /// Acceleration byte used unless configured otherwise
    pub const DEFAULT_ACCELERATION: u8 = 2;

    /// Speed used for lines without a feedrate
    pub const DEFAULT_SPEED: u16 = 600;

    /// Highest speed the servo accepts
    pub const MAX_SPEED: u16 = 3000;

    /// Device position unit is 1/100 of a G-code unit
    pub const POSITION_SCALE_FACTOR: f64 = 100.0;

    /// Feedrate maps 1:1 onto device speed units
    pub const SPEED_SCALE_FACTOR: f64 = 1.0;

    /// Range of the signed 24-bit position field
    pub const POSITION_MIN: i32 = -(1 << 23);
    pub const POSITION_MAX: i32 = (1 << 23) - 1;

    /// Default CAN bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 500_000;
}
