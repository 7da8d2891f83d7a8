//! Batch re-encoding: every matching file under a directory is re-encoded into
//! the same relative location under the job's output directory, one tool run
//! at a time under the job's controller.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::controller::TaskController;
use crate::error::AppError;
use crate::ffmpeg::temp::remove_temp_files;
use crate::ffmpeg::{CommandBuilder, ProgressEvent, RunOutcome, RunSettings, run_with_progress};
use crate::job::{JobParams, JobSpec};
use crate::paths::{normalize_extension, resolve_output_path, sanitize_file_name};

/// Used when a batch names no file types.
pub const DEFAULT_BATCH_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "avi", "mov", "flv", "webm"];

/// Lowercased extensions without dots; empty entries are dropped.
pub fn batch_extensions(file_types: &[String]) -> Vec<String> {
    let extensions: Vec<String> = file_types
        .iter()
        .flat_map(|types| types.split(','))
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if extensions.is_empty() {
        DEFAULT_BATCH_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    } else {
        extensions
    }
}

/// Files under `input_dir` (recursively) whose extension is in `extensions`,
/// sorted by path.
pub fn collect_batch_inputs(input_dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, AppError> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(input_dir).follow_links(true) {
        let entry = entry.map_err(|e| AppError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| extensions.contains(&ext));
        if matches {
            inputs.push(entry.into_path());
        }
    }
    inputs.sort();
    Ok(inputs)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    /// `relative/path (reason)` per failed file.
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn into_result(self) -> Result<String, AppError> {
        if self.failed.is_empty() {
            Ok(format!(
                "Batch re-encoding completed. {} files re-encoded successfully.",
                self.succeeded
            ))
        } else {
            Err(AppError::BatchIncomplete {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

/// Runs the batch described by a `BatchReencode` spec. A failed file is
/// recorded and the batch moves on; stop ends the whole batch. Partial outputs
/// of failed or stopped files are removed.
pub fn run_batch_reencode(
    spec: &JobSpec,
    builder: &dyn CommandBuilder,
    controller: &TaskController,
    settings: &RunSettings,
    emit: &mut dyn FnMut(ProgressEvent),
) -> Result<BatchReport, AppError> {
    let JobParams::BatchReencode {
        input_dir,
        file_types,
        video_codec,
        audio_codec,
    } = &spec.params
    else {
        return Err(AppError::Internal("not a batch re-encode job".into()));
    };

    let extension = normalize_extension(spec.extension.as_deref().unwrap_or_default());
    let inputs = collect_batch_inputs(input_dir, &batch_extensions(file_types))?;
    log::info!(
        target: "vidqueue::batch",
        "Batch of {} files from {} -> {}",
        inputs.len(),
        input_dir.display(),
        spec.output_dir.display()
    );

    let mut report = BatchReport::default();
    for (index, input) in inputs.iter().enumerate() {
        if controller.wait_while_paused(settings.poll_interval) {
            return Err(AppError::Stopped);
        }
        let relative = input.strip_prefix(input_dir).unwrap_or(input.as_path());
        emit(ProgressEvent::processing(format!(
            "Processing file {}/{}: {}",
            index + 1,
            inputs.len(),
            relative.display()
        )));

        let subdir = match relative.parent() {
            Some(parent) => spec.output_dir.join(parent),
            None => spec.output_dir.clone(),
        };
        std::fs::create_dir_all(&subdir)?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_spec = JobSpec {
            output_dir: subdir.clone(),
            output_name: sanitize_file_name(&stem),
            extension: Some(extension.clone()),
            params: JobParams::Reencode {
                input: input.clone(),
                video_codec: video_codec.clone(),
                audio_codec: audio_codec.clone(),
            },
        };
        let output = resolve_output_path(&subdir, &file_spec.output_name, &extension);
        let prepared = builder
            .build(&file_spec, &output)?
            .ok_or_else(|| AppError::Internal("no command for re-encode".into()))?;

        let outcome = run_with_progress(
            &prepared.command,
            prepared.known_duration,
            "Re-encoding",
            controller,
            settings,
            emit,
        );
        remove_temp_files(&prepared.temp_files);
        match outcome {
            RunOutcome::Success => report.succeeded += 1,
            RunOutcome::Stopped => {
                remove_partial(&output);
                return Err(AppError::Stopped);
            }
            RunOutcome::Failed(e @ AppError::ToolNotFound { .. }) => {
                remove_partial(&output);
                return Err(e);
            }
            RunOutcome::Failed(e) => {
                remove_partial(&output);
                log::warn!(
                    target: "vidqueue::batch",
                    "{} failed: {}",
                    relative.display(),
                    e
                );
                report
                    .failed
                    .push(format!("{} ({})", relative.display(), e.payload().summary));
            }
        }
    }
    Ok(report)
}

fn remove_partial(path: &Path) {
    if path.is_file()
        && let Err(e) = std::fs::remove_file(path)
    {
        log::warn!(
            target: "vidqueue::batch",
            "Failed to remove partial output {}: {}",
            path.display(),
            e
        );
    }
}
