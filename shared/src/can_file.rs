/*!
`.can` text format.

One frame per line, every byte as two uppercase hex digits separated by a
single space, in wire order:

```text
01 F5 00 C8 02 00 01 F4 B5
```

The reader also takes tokens holding several byte pairs, so the older
contiguous `01F500C8020001F4B5` form reads back the same way.
*/

use crate::error::{Result, SharedError};
use crate::frame::{CanFrame, FrameSequence};
use std::path::Path;
use tracing::info;

/// Render one frame as a `.can` line, without the newline
pub fn format_frame(frame: &CanFrame) -> String {
    frame
        .to_bytes()
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render frames as `.can` text
pub fn serialize(frames: &[CanFrame]) -> String {
    let mut text = String::with_capacity(frames.len() * 27);
    for frame in frames {
        text.push_str(&format_frame(frame));
        text.push('\n');
    }
    text
}

/// Parse one `.can` line; `line_no` is only used in errors
pub fn parse_frame_line(line_no: usize, line: &str) -> Result<CanFrame> {
    let mut bytes = Vec::with_capacity(crate::protocol::FRAME_LEN);
    for token in line.split_whitespace() {
        let decoded = hex::decode(token).map_err(|e| {
            SharedError::invalid_file_format(format!("line {}: bad hex '{}': {}", line_no, token, e))
        })?;
        bytes.extend(decoded);
    }

    CanFrame::from_bytes(&bytes)
        .map_err(|e| SharedError::invalid_file_format(format!("line {}: {}", line_no, e)))
}

/// Parse `.can` text, skipping blank lines and `#` comments
pub fn parse_can_text(text: &str) -> Result<FrameSequence> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| parse_frame_line(index + 1, line))
        .collect()
}

/// Write frames to a `.can` file
pub fn write_can_file<P: AsRef<Path>>(path: P, frames: &[CanFrame]) -> Result<()> {
    std::fs::write(path.as_ref(), serialize(frames))?;
    info!("Wrote {} frame(s) to {}", frames.len(), path.as_ref().display());
    Ok(())
}

/// Read frames from a `.can` file
pub fn read_can_file<P: AsRef<Path>>(path: P) -> Result<FrameSequence> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_can_text(&text)
}
