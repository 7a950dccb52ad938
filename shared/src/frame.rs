/*!
Makerbase absolute-position CAN frame.

Byte layout (9 bytes, multi-byte fields high byte first):

| offset | width | field                                   |
|--------|-------|-----------------------------------------|
| 0      | 1     | channel id (CAN arbitration id)         |
| 1      | 1     | mode, `0xF5` = absolute position        |
| 2      | 2     | speed, unsigned                         |
| 4      | 1     | acceleration                            |
| 5      | 3     | position, signed 24-bit two's complement|
| 8      | 1     | checksum, sum of bytes 0..8 mod 256     |

On the bus byte 0 is the arbitration id and bytes 1..9 are the 8 data bytes.
*/

use crate::axis::AxisId;
use crate::error::{Result, SharedError};
use crate::protocol::{FRAME_LEN, MODE_ABSOLUTE, POSITION_MAX, POSITION_MIN};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Additive checksum truncated to 8 bits
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a position as 24-bit two's complement, high byte first
pub fn encode_position(position: i32) -> [u8; 3] {
    let [_, hi, mid, lo] = ((position as u32) & 0x00FF_FFFF).to_be_bytes();
    [hi, mid, lo]
}

/// Decode a 24-bit two's complement position
pub fn decode_position(bytes: [u8; 3]) -> i32 {
    // Shift into the top of an i32 and back to sign-extend bit 23
    (i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0])) >> 8
}

/// One absolute-position command for one motor
///
/// The checksum is computed when the frame is assembled and there are no
/// setters; `with_*` returns a new frame with a fresh checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanFrame {
    id: u8,
    mode: u8,
    speed: u16,
    acceleration: u8,
    position: i32,
    crc: u8,
}

impl CanFrame {
    /// Build an absolute-position frame for an axis
    pub fn absolute(axis: AxisId, speed: u16, acceleration: u8, position: i32) -> Result<Self> {
        Self::assemble(axis.channel(), MODE_ABSOLUTE, speed, acceleration, position)
    }

    fn assemble(id: u8, mode: u8, speed: u16, acceleration: u8, position: i32) -> Result<Self> {
        if !(POSITION_MIN..=POSITION_MAX).contains(&position) {
            return Err(SharedError::invalid_frame(format!(
                "position {} does not fit in 24 bits",
                position
            )));
        }

        let mut frame = Self {
            id,
            mode,
            speed,
            acceleration,
            position,
            crc: 0,
        };
        let bytes = frame.to_bytes();
        frame.crc = checksum(&bytes[..FRAME_LEN - 1]);
        Ok(frame)
    }

    /// Parse and validate a 9-byte frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| {
            SharedError::invalid_frame(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                bytes.len()
            ))
        })?;

        if bytes[1] != MODE_ABSOLUTE {
            return Err(SharedError::invalid_frame(format!(
                "unsupported mode byte 0x{:02X}",
                bytes[1]
            )));
        }

        let frame = Self::assemble(
            bytes[0],
            bytes[1],
            u16::from_be_bytes([bytes[2], bytes[3]]),
            bytes[4],
            decode_position([bytes[5], bytes[6], bytes[7]]),
        )?;

        if frame.crc != bytes[8] {
            return Err(SharedError::invalid_frame(format!(
                "checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                frame.crc, bytes[8]
            )));
        }

        Ok(frame)
    }

    /// Wire bytes in ID, mode, speed, acceleration, position, checksum order
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let [speed_hi, speed_lo] = self.speed.to_be_bytes();
        let [pos_hi, pos_mid, pos_lo] = encode_position(self.position);
        [
            self.id,
            self.mode,
            speed_hi,
            speed_lo,
            self.acceleration,
            pos_hi,
            pos_mid,
            pos_lo,
            self.crc,
        ]
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn speed(&self) -> u16 {
        self.speed
    }

    pub fn acceleration(&self) -> u8 {
        self.acceleration
    }

    /// Position in device units (hundredths)
    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn crc(&self) -> u8 {
        self.crc
    }

    /// Axis addressed by this frame, if the id is a known channel
    pub fn axis(&self) -> Option<AxisId> {
        AxisId::from_channel(self.id)
    }

    /// Standard 11-bit CAN arbitration id
    pub fn arbitration_id(&self) -> u16 {
        u16::from(self.id)
    }

    /// The 8 CAN data bytes that follow the arbitration id
    pub fn data(&self) -> [u8; FRAME_LEN - 1] {
        let bytes = self.to_bytes();
        let mut data = [0u8; FRAME_LEN - 1];
        data.copy_from_slice(&bytes[1..]);
        data
    }
}

/// Ordered frames, X..C within a line and source order across lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<CanFrame>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: CanFrame) {
        self.frames.push(frame);
    }

    pub fn as_slice(&self) -> &[CanFrame] {
        &self.frames
    }
}

impl Deref for FrameSequence {
    type Target = [CanFrame];

    fn deref(&self) -> &Self::Target {
        &self.frames
    }
}

impl Extend<CanFrame> for FrameSequence {
    fn extend<I: IntoIterator<Item = CanFrame>>(&mut self, iter: I) {
        self.frames.extend(iter);
    }
}

impl FromIterator<CanFrame> for FrameSequence {
    fn from_iter<I: IntoIterator<Item = CanFrame>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FrameSequence {
    type Item = CanFrame;
    type IntoIter = std::vec::IntoIter<CanFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a CanFrame;
    type IntoIter = std::slice::Iter<'a, CanFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Progress reported by a motor after an absolute-position command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionStatus {
    Failed,
    Started,
    Completed,
    LimitStopped,
    Unknown(u8),
}

impl MotionStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Failed,
            1 => Self::Started,
            2 => Self::Completed,
            3 => Self::LimitStopped,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Failed => 0,
            Self::Started => 1,
            Self::Completed => 2,
            Self::LimitStopped => 3,
            Self::Unknown(other) => other,
        }
    }
}

/// Reply frame `[id] F5 status checksum`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorResponse {
    pub id: u8,
    pub status: MotionStatus,
}

impl MotorResponse {
    pub fn new(id: u8, status: MotionStatus) -> Self {
        Self { id, status }
    }

    /// Interpret a received CAN frame, `None` if it is not a valid reply
    pub fn from_can(arbitration_id: u16, data: &[u8]) -> Option<Self> {
        let id = u8::try_from(arbitration_id).ok()?;
        match data {
            [MODE_ABSOLUTE, status, crc, ..] if checksum(&[id, MODE_ABSOLUTE, *status]) == *crc => {
                Some(Self::new(id, MotionStatus::from_u8(*status)))
            }
            _ => None,
        }
    }

    /// Data bytes of this reply as a motor would send them
    pub fn data(&self) -> [u8; 3] {
        let status = self.status.as_u8();
        [MODE_ABSOLUTE, status, checksum(&[self.id, MODE_ABSOLUTE, status])]
    }
}
