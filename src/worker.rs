//! Runs one job from PROCESSING to a terminal state.
//!
//! Every exit path (success, stop, tool failure, invalid input, panic) ends in
//! exactly one completion callback, and a STOPPED or FAILED job leaves no
//! output file behind.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::run_batch_reencode;
use crate::config::EngineConfig;
use crate::controller::TaskController;
use crate::error::AppError;
use crate::ffmpeg::temp::remove_temp_files;
use crate::ffmpeg::{CommandBuilder, FfmpegCommandBuilder, ProgressEvent, run_with_progress};
use crate::job::{JobId, JobKind, JobObserver, JobOutcome, JobParams, JobSpec, JobStatus};
use crate::paths::{normalize_extension, resolve_output_path, sanitize_file_name};
use crate::strategy::{FallbackExtractor, YtDlpExtractor, run_download};

/// What the worker needs to turn a `JobSpec` into processes.
#[derive(Clone)]
pub struct JobExecutor {
    config: EngineConfig,
    builder: Arc<dyn CommandBuilder>,
    fallback: Arc<dyn FallbackExtractor>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            builder: Arc::new(FfmpegCommandBuilder::new(config.clone())),
            fallback: Arc::new(YtDlpExtractor::new(config.clone())),
            config,
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn CommandBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackExtractor>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the job and fires `observer.completion` exactly once.
    pub fn execute(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        controller: &TaskController,
        observer: JobObserver,
    ) -> JobOutcome {
        let JobObserver {
            progress,
            completion,
        } = observer;
        let mut emit = |event: ProgressEvent| {
            if catch_unwind(AssertUnwindSafe(|| progress(job_id, &event))).is_err() {
                log::warn!(
                    target: "vidqueue::worker",
                    "Progress callback panicked for job {}",
                    job_id
                );
            }
        };

        let mut output_path = None;
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run(spec, controller, &mut emit, &mut output_path)
        }))
        .unwrap_or_else(|panic| Err(AppError::Internal(panic_message(panic.as_ref()))));

        let outcome = self.finish(job_id, spec, controller, result, output_path);
        let delivered = outcome.clone();
        if catch_unwind(AssertUnwindSafe(move || completion(delivered))).is_err() {
            log::warn!(
                target: "vidqueue::worker",
                "Completion callback panicked for job {}",
                job_id
            );
        }
        outcome
    }

    /// Returns a completion message when the job has a more specific one than
    /// the kind's default.
    fn run(
        &self,
        spec: &JobSpec,
        controller: &TaskController,
        emit: &mut dyn FnMut(ProgressEvent),
        output_path: &mut Option<PathBuf>,
    ) -> Result<Option<String>, AppError> {
        if controller.is_stopped() {
            return Err(AppError::Stopped);
        }
        let kind = spec.kind();
        emit(ProgressEvent::processing(format!("{}...", kind.label())));

        spec.validate()?;
        let settings = self.config.run_settings();
        if let JobParams::BatchReencode { .. } = &spec.params {
            let report =
                run_batch_reencode(spec, self.builder.as_ref(), controller, &settings, emit)?;
            let message = report.into_result()?;
            *output_path = Some(spec.output_dir.clone());
            return Ok(Some(message));
        }

        let extension = normalize_extension(spec.extension.as_deref().unwrap_or_default());
        let base = sanitize_file_name(&spec.output_name);
        let output = resolve_output_path(&spec.output_dir, &base, &extension);
        log::info!(
            target: "vidqueue::worker",
            "Starting {} job -> {}",
            kind.as_str(),
            output.display()
        );
        *output_path = Some(output.clone());

        if kind == JobKind::Download {
            return run_download(
                spec,
                &output,
                self.builder.as_ref(),
                self.fallback.as_ref(),
                controller,
                &settings,
                emit,
            )
            .map(|()| None);
        }

        let prepared = self.builder.build(spec, &output)?.ok_or_else(|| {
            AppError::Internal(format!("no command for {} job", kind.as_str()))
        })?;
        let outcome = run_with_progress(
            &prepared.command,
            prepared.known_duration,
            kind.label(),
            controller,
            &settings,
            emit,
        );
        remove_temp_files(&prepared.temp_files);
        outcome.into_result().map(|()| None)
    }

    fn finish(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        controller: &TaskController,
        result: Result<Option<String>, AppError>,
        output_path: Option<PathBuf>,
    ) -> JobOutcome {
        let kind = spec.kind();
        // A stop that lands after the tool exited successfully still wins.
        let result = match result {
            Ok(_) if controller.is_stopped() => Err(AppError::Stopped),
            other => other,
        };
        let (status, message) = match &result {
            Ok(Some(message)) => (JobStatus::Completed, message.clone()),
            Ok(None) => (JobStatus::Completed, format!("{} finished.", kind.label())),
            Err(e) if e.is_stopped() => (JobStatus::Stopped, e.to_string()),
            Err(e) => (JobStatus::Failed, e.full_message()),
        };

        match status {
            JobStatus::Completed => log::info!(
                target: "vidqueue::worker",
                "Job {} ({}) completed",
                job_id,
                kind.as_str()
            ),
            JobStatus::Stopped => log::info!(
                target: "vidqueue::worker",
                "Job {} ({}) stopped by user",
                job_id,
                kind.as_str()
            ),
            _ => log::error!(
                target: "vidqueue::worker",
                "Job {} ({}) failed: {}",
                job_id,
                kind.as_str(),
                message
            ),
        }

        if status != JobStatus::Completed
            && let Some(path) = &output_path
        {
            remove_output(path);
        }

        JobOutcome {
            job_id,
            kind,
            status,
            message,
            output_path: output_path.filter(|_| status == JobStatus::Completed),
        }
    }
}

/// Only files are removed; a batch reports its output directory.
fn remove_output(path: &Path) {
    if !path.is_file() {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!(
            target: "vidqueue::worker",
            "Failed to remove incomplete output {}: {}",
            path.display(),
            e
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Internal error: {detail}")
}
