/*!
G-code line tokenizer.

Turns one line of G-code into a [`MotionCommand`]: the motion word, the
target coordinate of every axis named on the line, and the feedrate.
Only absolute linear positioning is understood; anything that would need
arc interpolation or machine state is rejected when it carries axis words.
*/

use crate::axis::AxisId;
use crate::error::{ParseErrorKind, Result, SharedError};
use regex::Regex;
use std::sync::OnceLock;

/// Letters that are accepted on a line but carry no motion
const IGNORED_LETTERS: &[char] = &['M', 'N', 'S', 'T', 'P', 'O', 'H', 'D', 'L'];

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([A-Za-z])([^A-Za-z]*)").expect("word pattern is valid"))
}

/// Motion word found on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandWord {
    /// G0
    Rapid,
    /// G1
    Linear,
    /// G90, targets on the same line are absolute positions
    AbsolutePositioning,
}

impl CommandWord {
    fn from_code(code: f64) -> Option<Self> {
        if code == 0.0 {
            Some(Self::Rapid)
        } else if code == 1.0 {
            Some(Self::Linear)
        } else if code == 90.0 {
            Some(Self::AbsolutePositioning)
        } else {
            None
        }
    }
}

/// One parsed G-code line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionCommand {
    pub command: Option<CommandWord>,
    pub feedrate: Option<f64>,
    targets: [Option<f64>; 6],
}

impl MotionCommand {
    /// Target coordinate for an axis, if the line named it
    pub fn target(&self, axis: AxisId) -> Option<f64> {
        self.targets[axis.index()]
    }

    /// Axis targets in X..C order regardless of their order on the line
    pub fn targets(&self) -> impl Iterator<Item = (AxisId, f64)> + '_ {
        AxisId::ALL
            .iter()
            .filter_map(move |axis| self.target(*axis).map(|value| (*axis, value)))
    }

    pub fn has_targets(&self) -> bool {
        self.targets.iter().any(Option::is_some)
    }
}

/// Strip comments, checksum and program delimiters
///
/// Parenthesised comments may hold any character; only a `;` or `*` outside
/// of them ends the line.
fn strip_comments(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ';' | '*' if depth == 0 => break,
            _ if depth == 0 => cleaned.push(ch),
            _ => {}
        }
    }

    if cleaned.trim_start().starts_with('%') {
        return String::new();
    }
    cleaned
}

/// Parse a single line; `Ok(None)` for blank and comment-only lines
///
/// `line_no` is 1-based and only used for error reporting.
pub fn parse_line(line_no: usize, text: &str) -> Result<Option<MotionCommand>> {
    let fail = |kind| SharedError::parse(line_no, text.trim_end(), kind);

    let cleaned = strip_comments(text);
    let mut command = MotionCommand::default();
    let mut other_commands = Vec::new();
    let mut saw_word = false;

    for chunk in cleaned.split_whitespace() {
        let mut expected_start = 0;
        for caps in word_pattern().captures_iter(chunk) {
            let (Some(whole), Some(letter), Some(value)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };

            if whole.start() != expected_start {
                let stray = chunk[expected_start..].chars().next().unwrap_or(' ');
                return Err(fail(ParseErrorKind::UnexpectedCharacter(stray)));
            }
            expected_start = whole.end();
            saw_word = true;

            let letter = letter.as_str().chars().next().unwrap_or(' ').to_ascii_uppercase();
            let value: f64 = value
                .as_str()
                .parse()
                .map_err(|_| fail(ParseErrorKind::InvalidNumber(chunk.to_string())))?;

            if let Some(axis) = AxisId::from_letter(letter) {
                if command.targets[axis.index()].replace(value).is_some() {
                    return Err(fail(ParseErrorKind::DuplicateWord(letter)));
                }
            } else if letter == 'F' {
                if value <= 0.0 {
                    return Err(fail(ParseErrorKind::InvalidFeedrate(value)));
                }
                if command.feedrate.replace(value).is_some() {
                    return Err(fail(ParseErrorKind::DuplicateWord('F')));
                }
            } else if letter == 'G' {
                match CommandWord::from_code(value) {
                    // G0/G1 describe the move better than G90 does
                    Some(CommandWord::AbsolutePositioning) if command.command.is_some() => {}
                    Some(word) => command.command = Some(word),
                    None => other_commands.push(format!("G{}", value)),
                }
            } else if !IGNORED_LETTERS.contains(&letter) {
                return Err(fail(ParseErrorKind::UnknownWord(letter)));
            }
        }

        if expected_start != chunk.len() {
            let stray = chunk[expected_start..].chars().next().unwrap_or(' ');
            return Err(fail(ParseErrorKind::UnexpectedCharacter(stray)));
        }
    }

    if command.has_targets() {
        if let Some(unsupported) = other_commands.into_iter().next() {
            return Err(fail(ParseErrorKind::UnsupportedCommand(unsupported)));
        }
    }

    Ok(saw_word.then_some(command))
}
