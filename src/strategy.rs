//! Download execution: a direct FFmpeg stream-copy cut first, then the
//! extractor tool as a one-shot fallback.
//!
//! Every attempt reports an `AttemptOutcome`; a user stop ends the job and is
//! never treated as a failure worth retrying.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::EngineConfig;
use crate::controller::TaskController;
use crate::error::AppError;
use crate::ffmpeg::builder::{CommandBuilder, download_postprocessor_args};
use crate::ffmpeg::discovery::Tool;
use crate::ffmpeg::runner::{
    RunOutcome, RunSettings, ToolCommand, path_to_string, run_stoppable, run_with_progress,
};
use crate::ffmpeg::temp::remove_temp_files;
use crate::ffmpeg::{DownloadProgressParser, ProgressEvent, ProgressThrottle};
use crate::job::{JobParams, JobSpec};

/// Where a download job reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    Network(Url),
    Local(PathBuf),
}

impl DownloadSource {
    pub fn classify(source: &str) -> Result<Self, AppError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(AppError::invalid_input("download source is empty"));
        }
        if let Ok(url) = Url::parse(source)
            && matches!(url.scheme(), "http" | "https")
        {
            return Ok(Self::Network(url));
        }
        let path = Path::new(source);
        if path.is_file() {
            return Ok(Self::Local(path.to_path_buf()));
        }
        Err(AppError::invalid_input(format!(
            "not a URL or an existing file: {source}"
        )))
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Completed,
    StoppedByUser,
    Failed(AppError),
}

impl From<RunOutcome> for AttemptOutcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => Self::Completed,
            RunOutcome::Stopped => Self::StoppedByUser,
            RunOutcome::Failed(e) if e.is_stopped() => Self::StoppedByUser,
            RunOutcome::Failed(e) => Self::Failed(e),
        }
    }
}

pub type Attempt<'a> = Box<dyn FnOnce(&mut dyn FnMut(ProgressEvent)) -> AttemptOutcome + 'a>;

fn remove_partial_output(output: &Path) {
    if output.exists() {
        match std::fs::remove_file(output) {
            Ok(()) => log::debug!(
                target: "vidqueue::strategy",
                "Removed partial output {}",
                output.display()
            ),
            Err(e) => log::warn!(
                target: "vidqueue::strategy",
                "Failed to remove partial output {}: {}",
                output.display(),
                e
            ),
        }
    }
}

/// Runs `primary` (if applicable) and, only when it failed for a reason other
/// than a user stop, `fallback` exactly once.
pub fn run_with_fallback(
    output: &Path,
    primary: Option<Attempt<'_>>,
    fallback: Attempt<'_>,
    emit: &mut dyn FnMut(ProgressEvent),
) -> Result<(), AppError> {
    let primary_error = match primary {
        None => None,
        Some(attempt) => match attempt(emit) {
            AttemptOutcome::Completed => return Ok(()),
            AttemptOutcome::StoppedByUser => return Err(AppError::Stopped),
            AttemptOutcome::Failed(e) => {
                log::warn!(
                    target: "vidqueue::strategy",
                    "Direct extraction failed, falling back: {}",
                    e
                );
                remove_partial_output(output);
                emit(ProgressEvent::processing("Retrying with fallback extractor..."));
                Some(e)
            }
        },
    };

    match fallback(emit) {
        AttemptOutcome::Completed => Ok(()),
        AttemptOutcome::StoppedByUser => Err(AppError::Stopped),
        AttemptOutcome::Failed(fallback_error) => match primary_error {
            Some(primary_error) => Err(AppError::FallbackExhausted {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
            None => Err(fallback_error),
        },
    }
}

/// Secondary download path, used when direct extraction is not applicable or failed.
pub trait FallbackExtractor: Send + Sync {
    fn extract(
        &self,
        job: &JobSpec,
        output: &Path,
        controller: &TaskController,
        settings: &RunSettings,
        emit: &mut dyn FnMut(ProgressEvent),
    ) -> AttemptOutcome;
}

/// yt-dlp arguments. `%` in the output path is escaped for the output template.
pub fn ytdlp_args(
    url: &str,
    output: &Path,
    ffmpeg_location: Option<&Path>,
    postprocessor_args: &[String],
) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        path_to_string(output).replace('%', "%%"),
    ];
    if let Some(ffmpeg) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(path_to_string(ffmpeg));
    }
    if !postprocessor_args.is_empty() {
        let container = output
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());
        args.push("--recode-video".to_string());
        args.push(container);
        args.push("--postprocessor-args".to_string());
        args.push(format!("VideoConvertor:{}", postprocessor_args.join(" ")));
    }
    args.push(url.to_string());
    args
}

/// Runs yt-dlp through the same stoppable runner as FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct YtDlpExtractor {
    config: EngineConfig,
}

impl YtDlpExtractor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl FallbackExtractor for YtDlpExtractor {
    fn extract(
        &self,
        job: &JobSpec,
        output: &Path,
        controller: &TaskController,
        settings: &RunSettings,
        emit: &mut dyn FnMut(ProgressEvent),
    ) -> AttemptOutcome {
        let JobParams::Download {
            url,
            start_time,
            end_time,
            video_codec,
            audio_codec,
            quality,
            low_vram,
        } = &job.params
        else {
            return AttemptOutcome::Failed(AppError::Internal(format!(
                "{} job routed to the download extractor",
                job.kind().as_str()
            )));
        };
        let program = match self.config.tool_path(Tool::YtDlp) {
            Ok(path) => path,
            Err(e) => return AttemptOutcome::Failed(e),
        };
        let pp_args = download_postprocessor_args(
            start_time.as_deref(),
            end_time.as_deref(),
            video_codec.as_deref(),
            audio_codec.as_deref(),
            *quality,
            *low_vram,
        );
        let command = ToolCommand::new(
            program,
            ytdlp_args(url, output, self.config.ffmpeg_path.as_deref(), &pp_args),
        );

        let mut parser = DownloadProgressParser;
        let mut throttle = ProgressThrottle::default();
        run_stoppable(&command, controller, settings, &mut |line| {
            if let Some(event) = parser.feed(line)
                && throttle.should_emit(&event)
            {
                emit(event);
            }
        })
        .into()
    }
}

/// Drives a download job: local sources are cut directly; network sources try
/// the direct cut (when both trim points exist) and then the extractor.
pub fn run_download(
    job: &JobSpec,
    output: &Path,
    builder: &dyn CommandBuilder,
    extractor: &dyn FallbackExtractor,
    controller: &TaskController,
    settings: &RunSettings,
    emit: &mut dyn FnMut(ProgressEvent),
) -> Result<(), AppError> {
    let JobParams::Download { url, .. } = &job.params else {
        return Err(AppError::Internal("not a download job".to_string()));
    };
    let label = job.kind().label();

    if let DownloadSource::Local(path) = DownloadSource::classify(url)? {
        log::info!(
            target: "vidqueue::strategy",
            "Cutting local source {}",
            path.display()
        );
        let prepared = builder.build(job, output)?.ok_or_else(|| {
            AppError::invalid_input("local sources need both a start and an end time")
        })?;
        let outcome = run_with_progress(
            &prepared.command,
            prepared.known_duration,
            label,
            controller,
            settings,
            emit,
        );
        remove_temp_files(&prepared.temp_files);
        return outcome.into_result();
    }

    let primary: Option<Attempt<'_>> = match builder.build(job, output) {
        Ok(None) => None,
        Ok(Some(prepared)) => Some(Box::new(move |emit: &mut dyn FnMut(ProgressEvent)| {
            let outcome = run_with_progress(
                &prepared.command,
                prepared.known_duration,
                label,
                controller,
                settings,
                emit,
            );
            remove_temp_files(&prepared.temp_files);
            outcome.into()
        })),
        Err(e) => Some(Box::new(move |_: &mut dyn FnMut(ProgressEvent)| {
            AttemptOutcome::Failed(e)
        })),
    };
    let fallback: Attempt<'_> = Box::new(|emit: &mut dyn FnMut(ProgressEvent)| {
        extractor.extract(job, output, controller, settings, emit)
    });
    run_with_fallback(output, primary, fallback, emit)
}
