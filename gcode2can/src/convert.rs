/*!
Batch conversion of `.gcode` files into `.can` files.
*/

use anyhow::{Context, Result};
use serde::Serialize;
use shared::{convert_directory, convert_file, write_can_file, Encoder};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// One converted file
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedFile {
    pub input: PathBuf,
    pub output: PathBuf,
    pub frames: usize,
}

/// One file that could not be converted
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub input: PathBuf,
    pub error: String,
}

/// What a conversion run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvertSummary {
    pub converted: Vec<ConvertedFile>,
    pub failed: Vec<FailedFile>,
}

/// `.can` path for an input file: same stem, in `output_dir` or beside the input
pub fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let file_name = input.with_extension("can");
    match (output_dir, file_name.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => file_name,
    }
}

fn prepare_output_dir(output_dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Convert a single file
pub fn convert_single(input: &Path, output_dir: Option<&Path>, encoder: &Encoder) -> Result<ConvertSummary> {
    prepare_output_dir(output_dir)?;

    let frames = convert_file(input, encoder)
        .with_context(|| format!("Failed to convert {}", input.display()))?;
    let output = output_path(input, output_dir);
    write_can_file(&output, &frames)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Successfully converted {} to {}", input.display(), output.display());
    Ok(ConvertSummary {
        converted: vec![ConvertedFile {
            input: input.to_path_buf(),
            output,
            frames: frames.len(),
        }],
        failed: Vec::new(),
    })
}

/// Convert every `.gcode` file in a directory; bad files are reported, not fatal
pub fn convert_all(dir: &Path, output_dir: Option<&Path>, encoder: &Encoder) -> Result<ConvertSummary> {
    prepare_output_dir(output_dir)?;

    let batch = convert_directory(dir, encoder)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut summary = ConvertSummary::default();
    for (input, error) in batch.failed {
        error!("An error occurred while processing {}: {}", input.display(), error);
        summary.failed.push(FailedFile {
            input,
            error: error.to_string(),
        });
    }

    for (input, frames) in batch.converted {
        let output = output_path(&input, output_dir);
        match write_can_file(&output, &frames) {
            Ok(()) => {
                info!("Successfully converted {} to {}", input.display(), output.display());
                summary.converted.push(ConvertedFile {
                    input,
                    output,
                    frames: frames.len(),
                });
            }
            Err(e) => {
                error!("Failed to write {}: {}", output.display(), e);
                summary.failed.push(FailedFile {
                    input,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(summary)
}
