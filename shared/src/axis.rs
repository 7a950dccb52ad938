/*!
Axis identifiers and the per-axis gear ratio table.

Axis order X, Y, Z, A, B, C is significant: it is the channel numbering on
the bus, the index into the gear ratio table, and the order frames are
emitted within a single G-code line.
*/

use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six motor axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AxisId {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
    B = 4,
    C = 5,
}

impl AxisId {
    /// All axes in emission order
    pub const ALL: [AxisId; 6] = [Self::X, Self::Y, Self::Z, Self::A, Self::B, Self::C];

    /// Parse an axis from its G-code letter (case-insensitive)
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Self::X),
            'Y' => Some(Self::Y),
            'Z' => Some(Self::Z),
            'A' => Some(Self::A),
            'B' => Some(Self::B),
            'C' => Some(Self::C),
            _ => None,
        }
    }

    /// Look up the axis driven by a CAN channel id
    pub fn from_channel(channel: u8) -> Option<Self> {
        Self::ALL.get(usize::from(channel).checked_sub(1)?).copied()
    }

    /// G-code letter
    pub fn letter(self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
            Self::Z => 'Z',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
        }
    }

    /// CAN channel identifier, 1 for X through 6 for C
    pub fn channel(self) -> u8 {
        self as u8 + 1
    }

    /// Position in the fixed axis order
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Immutable gear ratio table, one positive ratio per axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTable {
    ratios: [f64; 6],
}

impl AxisTable {
    /// Ratios used when no configuration is supplied
    pub const DEFAULT_RATIOS: [f64; 6] = [0.5, 0.5, 1.0, 1.0, 1.0, 1.0];

    /// Build a table from an ordered X..C list of ratios
    pub fn new(ratios: &[f64]) -> Result<Self> {
        let ratios: [f64; 6] = ratios.try_into().map_err(|_| {
            SharedError::config(format!(
                "gear ratio table needs exactly 6 values (X,Y,Z,A,B,C), got {}",
                ratios.len()
            ))
        })?;

        for (axis, ratio) in AxisId::ALL.iter().zip(ratios.iter()) {
            if !ratio.is_finite() || *ratio <= 0.0 {
                return Err(SharedError::config(format!(
                    "gear ratio for axis {} must be a positive number, got {}",
                    axis, ratio
                )));
            }
        }

        Ok(Self { ratios })
    }

    /// Gear ratio for one axis
    pub fn ratio(&self, axis: AxisId) -> f64 {
        self.ratios[axis.index()]
    }
}

impl Default for AxisTable {
    fn default() -> Self {
        Self {
            ratios: Self::DEFAULT_RATIOS,
        }
    }
}
