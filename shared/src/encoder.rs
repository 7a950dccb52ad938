/*!
G-code to CAN frame encoder.

The encoder is stateless between lines: every frame depends only on the
line it came from, the gear ratio table and the configured defaults.

Fixed-point conversions, both rounded half away from zero:

- position = target × gear ratio × [`POSITION_SCALE_FACTOR`] (hundredths)
- speed = feedrate × [`SPEED_SCALE_FACTOR`], clamped to `1..=MAX_SPEED`

Ties are decided on the decimal value written in the G-code, not on its
binary approximation: `X1.005` at ratio 1 is exactly half a step and becomes
101. Products are snapped to [`TIE_RESOLUTION`] before rounding.
*/

use crate::axis::{AxisId, AxisTable};
use crate::error::{ParseErrorKind, Result, SharedError};
use crate::frame::{CanFrame, FrameSequence};
use crate::gcode::{parse_line, MotionCommand};
use crate::protocol::{
    DEFAULT_ACCELERATION, DEFAULT_SPEED, MAX_SPEED, POSITION_MAX, POSITION_MIN,
    POSITION_SCALE_FACTOR, SPEED_SCALE_FACTOR,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scaled values closer than this to a half step count as the half step
pub const TIE_RESOLUTION: f64 = 1e-6;

/// Round half away from zero after snapping off binary representation error
fn round_scaled(value: f64) -> f64 {
    ((value / TIE_RESOLUTION).round() * TIE_RESOLUTION).round()
}

/// Everything the encoder needs besides the G-code itself
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub axes: AxisTable,
    /// Speed used when a line carries no feedrate
    pub default_speed: u16,
    pub acceleration: u8,
}

impl EncoderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.default_speed == 0 || self.default_speed > MAX_SPEED {
            return Err(SharedError::config(format!(
                "default speed must be within 1..={}, got {}",
                MAX_SPEED, self.default_speed
            )));
        }
        Ok(())
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            axes: AxisTable::default(),
            default_speed: DEFAULT_SPEED,
            acceleration: DEFAULT_ACCELERATION,
        }
    }
}

/// Converts G-code lines into absolute-position frames
#[derive(Debug, Clone)]
pub struct Encoder {
    settings: EncoderSettings,
}

impl Encoder {
    pub fn new(settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Encode a whole program, stopping at the first malformed line
    pub fn encode<I, S>(&self, lines: I) -> Result<FrameSequence>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut frames = FrameSequence::new();
        for (index, line) in lines.into_iter().enumerate() {
            frames.extend(self.encode_line(index + 1, line.as_ref())?);
        }
        Ok(frames)
    }

    /// Encode G-code held in a string
    pub fn encode_str(&self, text: &str) -> Result<FrameSequence> {
        self.encode(text.lines())
    }

    /// Encode one line; `line_no` is 1-based and used in errors
    pub fn encode_line(&self, line_no: usize, text: &str) -> Result<Vec<CanFrame>> {
        match parse_line(line_no, text)? {
            Some(command) => self.encode_command(line_no, text, &command),
            None => Ok(Vec::new()),
        }
    }

    /// Encode an already parsed line
    pub fn encode_command(
        &self,
        line_no: usize,
        text: &str,
        command: &MotionCommand,
    ) -> Result<Vec<CanFrame>> {
        if !command.has_targets() {
            if command.feedrate.is_some() {
                debug!("line {}: feedrate without axis words, nothing to send", line_no);
            }
            return Ok(Vec::new());
        }

        let speed = self.device_speed(command.feedrate);
        command
            .targets()
            .map(|(axis, target)| {
                let position = self.device_position(axis, target).ok_or_else(|| {
                    SharedError::parse(
                        line_no,
                        text.trim_end(),
                        ParseErrorKind::PositionOutOfRange {
                            axis: axis.letter(),
                            value: target,
                        },
                    )
                })?;
                CanFrame::absolute(axis, speed, self.settings.acceleration, position)
            })
            .collect()
    }

    /// Device speed for a feedrate, or the default when absent
    pub fn device_speed(&self, feedrate: Option<f64>) -> u16 {
        let Some(feedrate) = feedrate else {
            return self.settings.default_speed;
        };

        let scaled = round_scaled(feedrate * SPEED_SCALE_FACTOR);
        if scaled > f64::from(MAX_SPEED) {
            warn!("feedrate {} exceeds device maximum, clamped to {}", feedrate, MAX_SPEED);
            MAX_SPEED
        } else if scaled < 1.0 {
            warn!("feedrate {} rounds to zero, raised to 1", feedrate);
            1
        } else {
            scaled as u16
        }
    }

    /// Device position for an axis target, `None` if it does not fit in 24 bits
    pub fn device_position(&self, axis: AxisId, target: f64) -> Option<i32> {
        let scaled = round_scaled(target * self.settings.axes.ratio(axis) * POSITION_SCALE_FACTOR);
        if scaled >= f64::from(POSITION_MIN) && scaled <= f64::from(POSITION_MAX) {
            Some(scaled as i32)
        } else {
            None
        }
    }
}

/// Read and encode a single `.gcode` file
pub fn convert_file<P: AsRef<Path>>(path: P, encoder: &Encoder) -> Result<FrameSequence> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let frames = encoder.encode_str(&content)?;
    info!("Encoded {} into {} frame(s)", path.display(), frames.len());
    Ok(frames)
}

/// Result of converting every `.gcode` file in a directory
#[derive(Debug, Default)]
pub struct DirectoryConversion {
    pub converted: BTreeMap<PathBuf, FrameSequence>,
    pub failed: BTreeMap<PathBuf, SharedError>,
}

impl DirectoryConversion {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Convert every `.gcode` file directly inside `dir`
///
/// A file that fails to convert is recorded in `failed` and the rest still
/// run; only an unreadable directory is an error.
pub fn convert_directory<P: AsRef<Path>>(dir: P, encoder: &Encoder) -> Result<DirectoryConversion> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_gcode = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gcode"));
        if is_gcode && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut result = DirectoryConversion::default();
    for path in paths {
        match convert_file(&path, encoder) {
            Ok(frames) => {
                result.converted.insert(path, frames);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                result.failed.insert(path, e);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_position;
    use crate::protocol::MODE_ABSOLUTE;
    use tempfile::TempDir;

    fn encoder_with(ratios: [f64; 6]) -> Encoder {
        Encoder::new(EncoderSettings {
            axes: AxisTable::new(&ratios).unwrap(),
            ..EncoderSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_single_axis_frame() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let frames = encoder.encode_str("G1 X10 F200").unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].to_bytes(),
            [0x01, 0xF5, 0x00, 0xC8, 0x02, 0x00, 0x01, 0xF4, 0xB5]
        );
    }

    #[test]
    fn test_feedrate_only_line_is_noop() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        assert!(encoder.encode_str("F1500").unwrap().is_empty());
        assert!(encoder.encode_str("G1 F1500").unwrap().is_empty());
    }

    #[test]
    fn test_zero_move_still_emits_frame() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let frames = encoder.encode_str("G1 X0").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].axis(), Some(AxisId::X));
        assert_eq!(frames[0].position(), 0);
    }

    #[test]
    fn test_frames_follow_axis_order() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let frames = encoder.encode_str("G1 Z-3 Y5 X10").unwrap();
        let ids: Vec<u8> = frames.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_line_order_is_preserved() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let frames = encoder
            .encode_str("G1 Y1\n; comment\n\nG1 X2 C3\nM5\nG0 B4")
            .unwrap();
        let axes: Vec<AxisId> = frames.iter().filter_map(|f| f.axis()).collect();
        assert_eq!(axes, vec![AxisId::Y, AxisId::X, AxisId::C, AxisId::B]);
    }

    #[test]
    fn test_shared_speed_and_default_speed() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let frames = encoder.encode_str("G1 X1 Y2 F250\nG1 X3").unwrap();
        assert_eq!(frames[0].speed(), 250);
        assert_eq!(frames[1].speed(), 250);
        assert_eq!(frames[2].speed(), DEFAULT_SPEED);
    }

    #[test]
    fn test_speed_rounding_and_clamping() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        assert_eq!(encoder.device_speed(Some(100.5)), 101);
        assert_eq!(encoder.device_speed(Some(100.4)), 100);
        assert_eq!(encoder.device_speed(Some(9000.0)), MAX_SPEED);
        assert_eq!(encoder.device_speed(Some(0.2)), 1);
        assert_eq!(encoder.device_speed(None), DEFAULT_SPEED);
    }

    #[test]
    fn test_negative_position() {
        let encoder = encoder_with([1.0; 6]);
        let frames = encoder.encode_str("G1 A-100").unwrap();
        let bytes = frames[0].to_bytes();

        assert_eq!(frames[0].id(), 4);
        assert_eq!(bytes[1], MODE_ABSOLUTE);
        assert_eq!(&bytes[5..8], &[0xFF, 0xD8, 0xF0]);
        // Sign bit set, magnitude 100.00
        assert_ne!(bytes[5] & 0x80, 0);
        assert_eq!(decode_position([bytes[5], bytes[6], bytes[7]]), -10_000);
    }

    #[test]
    fn test_position_rounds_half_away_from_zero() {
        let encoder = encoder_with([1.0; 6]);
        assert_eq!(encoder.device_position(AxisId::X, 0.125), Some(13));
        assert_eq!(encoder.device_position(AxisId::X, -0.125), Some(-13));
        assert_eq!(encoder.device_position(AxisId::X, 0.124), Some(12));
    }

    #[test]
    fn test_decimal_ties_round_up() {
        let encoder = encoder_with([1.0; 6]);
        assert_eq!(encoder.device_position(AxisId::X, 1.005), Some(101));
        assert_eq!(encoder.device_position(AxisId::X, 0.145), Some(15));
        assert_eq!(encoder.device_position(AxisId::X, -0.145), Some(-15));
        assert_eq!(encoder.device_position(AxisId::X, 0.1449), Some(14));
        assert_eq!(encoder.device_speed(Some(200.4999)), 200);
    }

    #[test]
    fn test_comment_holding_semicolon_keeps_move() {
        let encoder = encoder_with([1.0; 6]);
        let frames = encoder.encode_str("(tool 3; roughing) G1 X10").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].axis(), Some(AxisId::X));
        assert_eq!(frames[0].position(), 1000);
    }

    #[test]
    fn test_gear_ratio_scaling() {
        let base = encoder_with([0.7, 0.5, 1.0, 1.0, 1.0, 1.0]);
        let halved = encoder_with([0.35, 0.25, 0.5, 0.5, 0.5, 0.5]);

        for value in [3.3, -17.25, 0.0, 120.0, 0.005] {
            for axis in [AxisId::X, AxisId::Y, AxisId::Z] {
                let a = base.device_position(axis, value).unwrap();
                let b = halved.device_position(axis, value * 2.0).unwrap();
                assert!((a - b).abs() <= 1, "{} vs {} for {}", a, b, value);
            }
        }
    }

    #[test]
    fn test_position_out_of_range() {
        let encoder = encoder_with([1.0; 6]);
        let err = encoder.encode_str("G1 X1\nG1 Y90000").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(
            err,
            SharedError::Parse {
                kind: ParseErrorKind::PositionOutOfRange { axis: 'Y', .. },
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_line_aborts_file() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let err = encoder.encode_str("G1 X1\nG1 X12a\nG1 X3").unwrap_err();
        match err {
            SharedError::Parse { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "G1 X12a");
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_validation() {
        let settings = EncoderSettings {
            default_speed: 0,
            ..EncoderSettings::default()
        };
        assert!(Encoder::new(settings).is_err());
    }

    #[test]
    fn test_convert_directory_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.gcode"), "G1 X1 Y2\n").unwrap();
        std::fs::write(dir.path().join("b.gcode"), "G1 X1\nG1 X12a\n").unwrap();
        std::fs::write(dir.path().join("c.gcode"), "G90 X1 Y2 Z3 A4 B5 C6\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "G1 X12a\n").unwrap();

        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        let result = convert_directory(dir.path(), &encoder).unwrap();

        assert!(!result.is_complete());
        assert_eq!(result.converted.len(), 2);
        assert_eq!(result.converted[&dir.path().join("a.gcode")].len(), 2);
        assert_eq!(result.converted[&dir.path().join("c.gcode")].len(), 6);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[&dir.path().join("b.gcode")].line(), Some(2));
    }

    #[test]
    fn test_convert_missing_directory() {
        let encoder = Encoder::new(EncoderSettings::default()).unwrap();
        assert!(convert_directory("/nonexistent/gcode/dir", &encoder).is_err());
    }
}
