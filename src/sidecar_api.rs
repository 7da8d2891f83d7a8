//! Job registry the sidecar binary talks to: submit, control and list jobs by id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::controller::TaskController;
use crate::error::AppError;
use crate::ffmpeg::{MediaInfo, Tool, probe_media};
use crate::job::{JobEvent, JobId, JobKind, JobObserver, JobSpec, JobStatus};
use crate::queue::JobDispatcher;
use crate::worker::JobExecutor;

const PROTOCOL_VERSION: u8 = 1;
/// Finished jobs kept for `list`/`status` before the oldest are forgotten.
const DEFAULT_FINISHED_RETENTION: usize = 256;

pub type JobEventEmitter = Arc<dyn Fn(JobEvent) + Send + Sync>;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub name: &'static str,
    pub path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub job_kinds: Vec<JobKind>,
    pub tools: Vec<ToolStatus>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
}

struct JobEntry {
    kind: JobKind,
    status: JobStatus,
    controller: TaskController,
}

type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// Drops the oldest finished entries beyond `keep`. Unfinished jobs always stay.
fn prune_finished(jobs: &mut HashMap<JobId, JobEntry>, keep: usize) {
    let mut finished: Vec<JobId> = jobs
        .iter()
        .filter(|(_, entry)| entry.status.is_terminal())
        .map(|(job_id, _)| *job_id)
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort_unstable();
    for job_id in &finished[..finished.len() - keep] {
        jobs.remove(job_id);
    }
}

/// Owns the per-kind queues and the controller of every unfinished job, plus
/// the most recent finished ones.
pub struct Engine {
    config: EngineConfig,
    dispatcher: JobDispatcher,
    jobs: JobTable,
    finished_retention: usize,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, AppError> {
        Self::with_executor(JobExecutor::new(config))
    }

    pub fn with_executor(executor: JobExecutor) -> Result<Self, AppError> {
        let config = executor.config().clone();
        Ok(Self {
            config,
            dispatcher: JobDispatcher::new(executor)?,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            finished_retention: DEFAULT_FINISHED_RETENTION,
        })
    }

    pub fn with_finished_retention(mut self, keep: usize) -> Self {
        self.finished_retention = keep;
        self
    }

    pub fn capabilities(&self) -> AppCapabilitiesResult {
        let tools = Tool::ALL
            .into_iter()
            .map(|tool| match self.config.tool_path(tool) {
                Ok(path) => ToolStatus {
                    name: tool.binary_name(),
                    path: Some(path.display().to_string()),
                    error: None,
                },
                Err(e) => ToolStatus {
                    name: tool.binary_name(),
                    path: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        AppCapabilitiesResult {
            protocol_version: PROTOCOL_VERSION,
            job_kinds: JobKind::ALL.to_vec(),
            tools,
        }
    }

    pub fn probe(&self, path: &Path) -> Result<MediaInfo, AppError> {
        if !path.exists() {
            return Err(AppError::invalid_input(format!(
                "file does not exist: {}",
                path.display()
            )));
        }
        let ffprobe = self.config.tool_path(Tool::Ffprobe)?;
        probe_media(&ffprobe, path)
    }

    /// Queues a job and tracks its status. `emit` receives every progress event
    /// and then exactly one `Finished`.
    pub fn submit(&self, spec: JobSpec, emit: JobEventEmitter) -> Result<JobId, AppError> {
        let kind = spec.kind();
        let controller = TaskController::new();

        let progress_jobs = Arc::clone(&self.jobs);
        let progress_emit = Arc::clone(&emit);
        let completion_jobs = Arc::clone(&self.jobs);
        let keep = self.finished_retention;
        let observer = JobObserver::new(
            move |job_id, event| {
                if let Some(entry) = progress_jobs.lock().get_mut(&job_id)
                    && entry.status == JobStatus::Queued
                {
                    entry.status = JobStatus::Processing;
                }
                progress_emit(JobEvent::Progress {
                    job_id,
                    event: event.clone(),
                });
            },
            move |outcome| {
                {
                    let mut jobs = completion_jobs.lock();
                    if let Some(entry) = jobs.get_mut(&outcome.job_id) {
                        entry.status = outcome.status;
                    }
                    prune_finished(&mut jobs, keep);
                }
                emit(JobEvent::Finished(outcome));
            },
        );

        // Held across submit so the worker cannot report on an unregistered id.
        let mut jobs = self.jobs.lock();
        let job_id = self.dispatcher.submit(spec, controller.clone(), observer)?;
        jobs.insert(
            job_id,
            JobEntry {
                kind,
                status: JobStatus::Queued,
                controller,
            },
        );
        Ok(job_id)
    }

    fn controller(&self, job_id: JobId) -> Result<TaskController, AppError> {
        self.jobs
            .lock()
            .get(&job_id)
            .map(|entry| entry.controller.clone())
            .ok_or_else(|| AppError::invalid_input(format!("unknown job id {job_id}")))
    }

    pub fn pause(&self, job_id: JobId) -> Result<(), AppError> {
        self.controller(job_id)?.pause();
        Ok(())
    }

    pub fn resume(&self, job_id: JobId) -> Result<(), AppError> {
        self.controller(job_id)?.resume();
        Ok(())
    }

    /// Stopping a finished job is a no-op.
    pub fn stop(&self, job_id: JobId) -> Result<(), AppError> {
        self.controller(job_id)?.stop();
        Ok(())
    }

    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.jobs.lock().get(&job_id).map(|entry| entry.status)
    }

    pub fn list(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .jobs
            .lock()
            .iter()
            .map(|(job_id, entry)| JobSummary {
                job_id: *job_id,
                kind: entry.kind,
                status: entry.status,
            })
            .collect();
        jobs.sort_by_key(|job| job.job_id);
        jobs
    }

    /// Stops every unfinished job, then drains and joins the workers.
    pub fn shutdown(&self) {
        let active: Vec<TaskController> = self
            .jobs
            .lock()
            .values()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.controller.clone())
            .collect();
        if !active.is_empty() {
            log::info!(target: "vidqueue::sidecar", "Stopping {} unfinished job(s)", active.len());
        }
        for controller in active {
            controller.stop();
        }
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::{CommandBuilder, PreparedCommand, ProgressEvent, RunSettings};
    use crate::job::{JobOutcome, JobParams};
    use crate::strategy::{AttemptOutcome, FallbackExtractor};
    use std::sync::mpsc;
    use std::time::Duration;

    struct NoDirectCommand;

    impl CommandBuilder for NoDirectCommand {
        fn build(&self, _: &JobSpec, _: &Path) -> Result<Option<PreparedCommand>, AppError> {
            Ok(None)
        }
    }

    /// Waits until stopped, polling like a real process run would.
    struct BlockingExtractor;

    impl FallbackExtractor for BlockingExtractor {
        fn extract(
            &self,
            _: &JobSpec,
            _: &Path,
            controller: &TaskController,
            _: &RunSettings,
            emit: &mut dyn FnMut(ProgressEvent),
        ) -> AttemptOutcome {
            emit(ProgressEvent::processing("Downloading"));
            while !controller.is_stopped() {
                std::thread::sleep(Duration::from_millis(5));
            }
            AttemptOutcome::StoppedByUser
        }
    }

    fn engine() -> Engine {
        let executor = JobExecutor::new(EngineConfig::default())
            .with_builder(Arc::new(NoDirectCommand))
            .with_fallback(Arc::new(BlockingExtractor));
        Engine::with_executor(executor).unwrap()
    }

    fn download(dir: &Path) -> JobSpec {
        JobSpec {
            output_dir: dir.to_path_buf(),
            output_name: "clip".to_string(),
            extension: None,
            params: JobParams::Download {
                url: "https://example.com/v".to_string(),
                start_time: None,
                end_time: None,
                video_codec: None,
                audio_codec: None,
                quality: None,
                low_vram: false,
            },
        }
    }

    fn finished_channel() -> (JobEventEmitter, mpsc::Receiver<JobOutcome>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let emit: JobEventEmitter = Arc::new(move |event| {
            if let JobEvent::Finished(outcome) = event {
                let _ = tx.lock().send(outcome);
            }
        });
        (emit, rx)
    }

    #[test]
    fn stop_by_id_finishes_job_as_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let (emit, rx) = finished_channel();
        let job_id = engine.submit(download(dir.path()), emit).unwrap();

        engine.stop(job_id).unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(outcome.job_id, job_id);
        assert_eq!(outcome.status, JobStatus::Stopped);
        assert_eq!(engine.status(job_id), Some(JobStatus::Stopped));
        // Stopping again is harmless.
        engine.stop(job_id).unwrap();
    }

    #[test]
    fn unknown_job_id_is_rejected() {
        let engine = engine();
        assert!(matches!(engine.pause(42), Err(AppError::InvalidInput(_))));
        assert!(matches!(engine.stop(42), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn list_reports_jobs_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let (emit, rx) = finished_channel();
        let first = engine.submit(download(dir.path()), Arc::clone(&emit)).unwrap();
        let second = engine.submit(download(dir.path()), emit).unwrap();

        let listed: Vec<JobId> = engine.list().iter().map(|job| job.job_id).collect();
        assert_eq!(listed, vec![first, second]);
        assert!(engine.list().iter().all(|job| job.kind == JobKind::Download));

        engine.shutdown();
        let statuses: Vec<JobStatus> = rx.try_iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![JobStatus::Stopped, JobStatus::Stopped]);
    }

    #[test]
    fn only_recent_finished_jobs_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine().with_finished_retention(2);
        let (emit, rx) = finished_channel();
        let ids: Vec<JobId> = (0..4)
            .map(|_| engine.submit(download(dir.path()), Arc::clone(&emit)).unwrap())
            .collect();

        engine.shutdown();
        assert_eq!(rx.try_iter().count(), 4);
        let listed: Vec<JobId> = engine.list().iter().map(|job| job.job_id).collect();
        assert_eq!(listed, ids[2..].to_vec());
        assert_eq!(engine.status(ids[0]), None);
        assert!(matches!(engine.stop(ids[0]), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn capabilities_lists_every_kind_and_tool() {
        let caps = engine().capabilities();
        assert_eq!(caps.job_kinds, JobKind::ALL.to_vec());
        assert_eq!(caps.tools.len(), Tool::ALL.len());
        for tool in &caps.tools {
            assert!(tool.path.is_some() != tool.error.is_some());
        }
    }

    #[test]
    fn media_info_for_missing_file_is_invalid_input() {
        let err = engine()
            .probe(Path::new("/definitely/not/here.mp4"))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
