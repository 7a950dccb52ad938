/*!
Common error types for the G-code to CAN pipeline.
*/

use std::time::Duration;
use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// What exactly was wrong with a G-code line
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("invalid number in word '{0}'")]
    InvalidNumber(String),

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("unknown word letter '{0}'")]
    UnknownWord(char),

    #[error("word '{0}' appears more than once")]
    DuplicateWord(char),

    #[error("command {0} cannot carry axis coordinates")]
    UnsupportedCommand(String),

    #[error("feedrate must be positive, got {0}")]
    InvalidFeedrate(f64),

    #[error("axis {axis} position {value} does not fit in 24 bits")]
    PositionOutOfRange { axis: char, value: f64 },
}

/// Failures at the transport boundary
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("write failed: {0}")]
    Write(String),

    #[error("adapter rejected frame")]
    Rejected,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("transport is closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Comprehensive error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// Malformed G-code, always tied to a source line
    #[error("line {line}: {kind} (in \"{text}\")")]
    Parse {
        line: usize,
        text: String,
        kind: ParseErrorKind,
    },

    /// Transmission aborted after `sent` frames went out
    #[error("transport error after {sent} frame(s): {source}")]
    Transport {
        sent: usize,
        #[source]
        source: TransportError,
    },

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid frame data
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// File format errors
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SharedError {
    /// Create a new parse error for a source line
    pub fn parse(line: usize, text: impl Into<String>, kind: ParseErrorKind) -> Self {
        Self::Parse {
            line,
            text: text.into(),
            kind,
        }
    }

    /// Create a new transport error with the count of frames already sent
    pub fn transport(sent: usize, source: TransportError) -> Self {
        Self::Transport { sent, source }
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a new invalid file format error
    pub fn invalid_file_format(msg: impl Into<String>) -> Self {
        Self::InvalidFileFormat(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Source line of a parse error
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Frames sent before a transport error
    pub fn frames_sent(&self) -> Option<usize> {
        match self {
            Self::Transport { sent, .. } => Some(*sent),
            _ => None,
        }
    }
}
