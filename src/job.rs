//! Job descriptors, states and the observer callbacks a submitter provides.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ffmpeg::{Phase, ProgressEvent};
use crate::strategy::DownloadSource;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Download,
    Clip,
    Reencode,
    Merge,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Download,
        JobKind::Clip,
        JobKind::Reencode,
        JobKind::Merge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Clip => "clip",
            JobKind::Reencode => "reencode",
            JobKind::Merge => "merge",
        }
    }

    /// Progress message prefix.
    pub fn label(self) -> &'static str {
        match self {
            JobKind::Download => "Downloading",
            JobKind::Clip => "Clipping",
            JobKind::Reencode => "Re-encoding",
            JobKind::Merge => "Merging",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClipMode {
    /// Keyframe-aligned cut without re-encoding.
    #[default]
    StreamCopy,
    /// Frame-accurate cut that re-encodes.
    Precise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum JobParams {
    #[serde(rename_all = "camelCase")]
    Download {
        /// URL, or a local file path.
        url: String,
        #[serde(default)]
        start_time: Option<String>,
        #[serde(default)]
        end_time: Option<String>,
        #[serde(default)]
        video_codec: Option<String>,
        #[serde(default)]
        audio_codec: Option<String>,
        /// Constant-quality value for the hardware encoder preset.
        #[serde(default)]
        quality: Option<u32>,
        #[serde(default)]
        low_vram: bool,
    },
    #[serde(rename_all = "camelCase")]
    Clip {
        input: PathBuf,
        start_time: String,
        end_time: String,
        #[serde(default)]
        mode: ClipMode,
    },
    #[serde(rename_all = "camelCase")]
    Reencode {
        input: PathBuf,
        video_codec: String,
        audio_codec: String,
    },
    Merge { inputs: Vec<PathBuf> },
    /// Every matching file under `input_dir`, mirrored into the output directory.
    #[serde(rename_all = "camelCase")]
    BatchReencode {
        input_dir: PathBuf,
        /// Extensions such as `mp4` or `".mkv, webm"`; empty means common video types.
        #[serde(default)]
        file_types: Vec<String>,
        video_codec: String,
        audio_codec: String,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Download { .. } => JobKind::Download,
            JobParams::Clip { .. } => JobKind::Clip,
            JobParams::Reencode { .. } | JobParams::BatchReencode { .. } => JobKind::Reencode,
            JobParams::Merge { .. } => JobKind::Merge,
        }
    }
}

/// Parses a trim point given as `SS`, `MM:SS` or `HH:MM:SS`, each with an
/// optional fraction on the last component.
pub fn parse_trim_point(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let mut total = 0.0;
    for part in parts {
        let v: f64 = part.trim().parse().ok()?;
        if !v.is_finite() || v < 0.0 {
            return None;
        }
        total = total * 60.0 + v;
    }
    Some(total)
}

/// Start and end of a cut, in seconds. Errors unless end > start.
pub fn trim_range(start: &str, end: &str) -> Result<(f64, f64), AppError> {
    let start_secs = parse_trim_point(start)
        .ok_or_else(|| AppError::invalid_input(format!("invalid start time {start:?}")))?;
    let end_secs = parse_trim_point(end)
        .ok_or_else(|| AppError::invalid_input(format!("invalid end time {end:?}")))?;
    if end_secs <= start_secs {
        return Err(AppError::invalid_input(format!(
            "end time {end} must be after start time {start}"
        )));
    }
    Ok((start_secs, end_secs))
}

/// Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub output_dir: PathBuf,
    pub output_name: String,
    #[serde(default)]
    pub extension: Option<String>,
    pub params: JobParams,
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        self.params.kind()
    }

    /// Checks everything that can be checked without running a tool.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.output_dir.is_dir() {
            return Err(AppError::invalid_input(format!(
                "output directory does not exist: {}",
                self.output_dir.display()
            )));
        }
        match &self.params {
            JobParams::Download {
                url,
                start_time,
                end_time,
                ..
            } => {
                let source = DownloadSource::classify(url)?;
                match (start_time.as_deref(), end_time.as_deref()) {
                    (Some(start), Some(end)) => {
                        trim_range(start, end)?;
                    }
                    (Some(point), None) | (None, Some(point)) => {
                        if parse_trim_point(point).is_none() {
                            return Err(AppError::invalid_input(format!(
                                "invalid trim point {point:?}"
                            )));
                        }
                        if matches!(source, DownloadSource::Local(_)) {
                            return Err(AppError::invalid_input(
                                "local sources need both a start and an end time",
                            ));
                        }
                    }
                    (None, None) => {
                        if matches!(source, DownloadSource::Local(_)) {
                            return Err(AppError::invalid_input(
                                "local sources need both a start and an end time",
                            ));
                        }
                    }
                }
            }
            JobParams::Clip {
                input,
                start_time,
                end_time,
                ..
            } => {
                require_file(input)?;
                trim_range(start_time, end_time)?;
            }
            JobParams::Reencode {
                input,
                video_codec,
                audio_codec,
            } => {
                require_file(input)?;
                if video_codec.trim().is_empty() || audio_codec.trim().is_empty() {
                    return Err(AppError::invalid_input("codecs must not be empty"));
                }
            }
            JobParams::BatchReencode {
                input_dir,
                video_codec,
                audio_codec,
                ..
            } => {
                if !input_dir.is_dir() {
                    return Err(AppError::invalid_input(format!(
                        "input directory does not exist: {}",
                        input_dir.display()
                    )));
                }
                if video_codec.trim().is_empty() || audio_codec.trim().is_empty() {
                    return Err(AppError::invalid_input("codecs must not be empty"));
                }
            }
            JobParams::Merge { inputs } => {
                if inputs.is_empty() {
                    return Err(AppError::invalid_input("no input files provided"));
                }
                for input in inputs {
                    require_file(input)?;
                }
            }
        }
        Ok(())
    }
}

fn require_file(path: &Path) -> Result<(), AppError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!(
            "input file does not exist: {}",
            path.display()
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub message: String,
    pub output_path: Option<PathBuf>,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Final phase event matching the outcome.
    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent::Phase {
            phase: if self.success() {
                Phase::Finished
            } else {
                Phase::Error
            },
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress { job_id: JobId, event: ProgressEvent },
    Finished(JobOutcome),
}

pub type ProgressCallback = Arc<dyn Fn(JobId, &ProgressEvent) + Send + Sync>;
pub type CompletionCallback = Box<dyn FnOnce(JobOutcome) + Send>;

/// Callbacks invoked on the worker thread: any number of progress events, then
/// exactly one completion.
pub struct JobObserver {
    pub progress: ProgressCallback,
    pub completion: CompletionCallback,
}

impl JobObserver {
    pub fn new(
        progress: impl Fn(JobId, &ProgressEvent) + Send + Sync + 'static,
        completion: impl FnOnce(JobOutcome) + Send + 'static,
    ) -> Self {
        Self {
            progress: Arc::new(progress),
            completion: Box::new(completion),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {}, |_| {})
    }

    /// Forwards every callback into a channel, for a control thread to drain.
    pub fn channel() -> (Self, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        let progress_tx = Mutex::new(tx.clone());
        let observer = Self::new(
            move |job_id, event: &ProgressEvent| {
                let _ = progress_tx.lock().send(JobEvent::Progress {
                    job_id,
                    event: event.clone(),
                });
            },
            move |outcome| {
                let _ = tx.send(JobEvent::Finished(outcome));
            },
        );
        (observer, rx)
    }
}

impl std::fmt::Debug for JobObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobObserver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_deserialize_from_tagged_json() {
        let spec: JobSpec = serde_json::from_str(
            r#"{
                "outputDir": "/tmp/out",
                "outputName": "clip",
                "params": {
                    "kind": "clip",
                    "input": "/videos/in.mp4",
                    "startTime": "00:00:01",
                    "endTime": "00:00:05",
                    "mode": "precise"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(spec.kind(), JobKind::Clip);
        assert_eq!(spec.extension, None);
        match spec.params {
            JobParams::Clip { mode, .. } => assert_eq!(mode, ClipMode::Precise),
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn download_params_default_optional_fields() {
        let params: JobParams =
            serde_json::from_str(r#"{"kind": "download", "url": "https://example.com/v"}"#).unwrap();
        assert_eq!(params.kind(), JobKind::Download);
        assert!(matches!(params, JobParams::Download { start_time: None, low_vram: false, .. }));
    }

    #[test]
    fn trim_points() {
        assert_eq!(parse_trim_point("90"), Some(90.0));
        assert_eq!(parse_trim_point("01:30"), Some(90.0));
        assert_eq!(parse_trim_point("00:01:30.5"), Some(90.5));
        assert_eq!(parse_trim_point(""), None);
        assert_eq!(parse_trim_point("1:2:3:4"), None);
        assert_eq!(parse_trim_point("-5"), None);
        assert!(trim_range("00:00:05", "00:00:01").is_err());
        assert_eq!(trim_range("5", "00:00:07").unwrap(), (5.0, 7.0));
    }

    fn spec(dir: &Path, params: JobParams) -> JobSpec {
        JobSpec {
            output_dir: dir.to_path_buf(),
            output_name: "out".into(),
            extension: None,
            params,
        }
    }

    #[test]
    fn validate_rejects_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let clip = spec(
            dir.path(),
            JobParams::Clip {
                input: missing.clone(),
                start_time: "0".into(),
                end_time: "5".into(),
                mode: ClipMode::StreamCopy,
            },
        );
        assert!(matches!(clip.validate(), Err(AppError::InvalidInput(_))));

        let merge = spec(dir.path(), JobParams::Merge { inputs: vec![] });
        assert!(matches!(merge.validate(), Err(AppError::InvalidInput(_))));

        let mut bad_dir = spec(dir.path(), JobParams::Merge { inputs: vec![missing] });
        bad_dir.output_dir = dir.path().join("nope");
        assert!(matches!(bad_dir.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn validate_download_sources() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("in.mp4");
        std::fs::write(&local, b"x").unwrap();
        let download = |url: String, start: Option<&str>, end: Option<&str>| {
            spec(
                dir.path(),
                JobParams::Download {
                    url,
                    start_time: start.map(String::from),
                    end_time: end.map(String::from),
                    video_codec: None,
                    audio_codec: None,
                    quality: None,
                    low_vram: false,
                },
            )
        };
        assert!(download("https://example.com/v".into(), None, None).validate().is_ok());
        assert!(download("https://example.com/v".into(), Some("10"), None).validate().is_ok());
        let local_str = local.to_string_lossy().into_owned();
        assert!(download(local_str.clone(), Some("1"), Some("2")).validate().is_ok());
        assert!(download(local_str, Some("1"), None).validate().is_err());
        assert!(download("not a url or file".into(), None, None).validate().is_err());
    }

    #[test]
    fn batch_reencode_params() {
        let dir = tempfile::tempdir().unwrap();
        let params: JobParams = serde_json::from_str(&format!(
            r#"{{"kind": "batchReencode", "inputDir": {:?}, "videoCodec": "libx265", "audioCodec": "aac"}}"#,
            dir.path().to_string_lossy()
        ))
        .unwrap();
        assert_eq!(params.kind(), JobKind::Reencode);
        assert!(matches!(&params, JobParams::BatchReencode { file_types, .. } if file_types.is_empty()));
        assert!(spec(dir.path(), params).validate().is_ok());

        let missing = spec(
            dir.path(),
            JobParams::BatchReencode {
                input_dir: dir.path().join("nope"),
                file_types: vec![],
                video_codec: "libx264".into(),
                audio_codec: "aac".into(),
            },
        );
        assert!(matches!(missing.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
    }

    #[test]
    fn outcome_event_phase() {
        let outcome = JobOutcome {
            job_id: 1,
            kind: JobKind::Merge,
            status: JobStatus::Stopped,
            message: "Stopped by user".into(),
            output_path: None,
        };
        assert!(!outcome.success());
        assert_eq!(
            outcome.to_event(),
            ProgressEvent::Phase {
                phase: Phase::Error,
                message: "Stopped by user".into()
            }
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["kind"], "merge");
    }

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, rx) = JobObserver::channel();
        (observer.progress)(7, &ProgressEvent::processing("Merging..."));
        (observer.completion)(JobOutcome {
            job_id: 7,
            kind: JobKind::Merge,
            status: JobStatus::Completed,
            message: "done".into(),
            output_path: None,
        });
        assert!(matches!(rx.recv().unwrap(), JobEvent::Progress { job_id: 7, .. }));
        assert!(matches!(rx.recv().unwrap(), JobEvent::Finished(o) if o.success()));
    }
}
