#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use vidqueue_core::{
    EngineConfig, JobEvent, JobExecutor, JobObserver, JobOutcome, JobParams, JobSpec,
    TaskController,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Fake ffmpeg: writes its last argument (the output path), reports progress, exits 0.
pub const FFMPEG_OK: &str = r#"
for last; do :; done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "out_time=00:00:05.000000"
printf 'media' > "$last"
echo "out_time=00:00:10.000000"
exit 0
"#;

/// Fake ffmpeg that leaves a partial output and fails with code 3.
pub const FFMPEG_FAIL: &str = r#"
for last; do :; done
printf 'partial' > "$last"
echo "Conversion failed!" >&2
exit 3
"#;

/// Fake ffmpeg that writes a partial output and then runs until signalled.
pub const FFMPEG_HANG: &str = r#"
for last; do :; done
printf 'partial' > "$last"
echo "out_time=00:00:01.000000"
exec sleep 30
"#;

/// Fake ffmpeg that takes about a second before finishing.
pub const FFMPEG_SLOW: &str = r#"
for last; do :; done
echo "out_time=00:00:01.000000"
sleep 1
printf 'media' > "$last"
exit 0
"#;

/// Fake ffmpeg whose helper writes the output a second after progress starts,
/// while the tool itself just waits for it.
pub const FFMPEG_LATE_WRITER: &str = r#"
for last; do :; done
( sleep 1; printf 'late' > "$last" ) &
echo "out_time=00:00:01.000000"
wait
"#;

/// Fake ffmpeg that appends to `ticks.fg` from the tool and `ticks.bg` from a
/// background helper, every 50ms, for at most 20 seconds.
pub const FFMPEG_TICKING: &str = r#"
dir="$(dirname "$0")"
( i=0; while [ $i -lt 400 ]; do echo t >> "$dir/ticks.bg"; sleep 0.05; i=$((i+1)); done ) &
echo "out_time=00:00:01.000000"
i=0
while [ $i -lt 400 ]; do echo t >> "$dir/ticks.fg"; sleep 0.05; i=$((i+1)); done
wait
"#;

/// Fake ffmpeg that fails for inputs whose path mentions `broken`.
pub const FFMPEG_PICKY: &str = r#"
for last; do :; done
case "$*" in
  *broken*) echo "broken.mov: Invalid data found when processing input" >&2; exit 1 ;;
esac
printf 'media' > "$last"
exit 0
"#;

/// Fake yt-dlp: writes the `-o` target, reports download progress, and leaves
/// a marker next to itself so tests can tell it ran.
pub const YTDLP_OK: &str = r#"
marker="$(dirname "$0")/ytdlp.ran"
echo run >> "$marker"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "[download]  42.0% of 10.00MiB at 1.00MiB/s ETA 00:05"
printf 'downloaded' > "$out"
echo "[download] 100.0% of 10.00MiB"
exit 0
"#;

pub struct IntegrationEnv {
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes an executable `/bin/sh` script.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"input").expect("write input");
        path
    }

    pub fn output_dir(&self) -> PathBuf {
        let dir = self.path("out");
        fs::create_dir_all(&dir).expect("create output dir");
        dir
    }

    pub fn ytdlp_runs(&self) -> usize {
        fs::read_to_string(self.path("ytdlp.ran"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Lines written so far to a tick file of `FFMPEG_TICKING`.
    pub fn ticks(&self, name: &str) -> usize {
        fs::read_to_string(self.path(name))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn config(&self, ffmpeg: Option<PathBuf>, ytdlp: Option<PathBuf>) -> EngineConfig {
        let mut config = EngineConfig {
            ffmpeg_path: ffmpeg,
            ytdlp_path: ytdlp,
            ..EngineConfig::default()
        };
        config.run.poll_interval = Duration::from_millis(20);
        config.run.stop_grace = Duration::from_millis(500);
        config
    }

    pub fn reencode_spec(&self, input: &Path) -> JobSpec {
        JobSpec {
            output_dir: self.output_dir(),
            output_name: "result".to_string(),
            extension: Some("mp4".to_string()),
            params: JobParams::Reencode {
                input: input.to_path_buf(),
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
            },
        }
    }

    pub fn batch_spec(&self, input_dir: &Path, file_types: &[&str]) -> JobSpec {
        JobSpec {
            output_dir: self.output_dir(),
            output_name: "batch".to_string(),
            extension: Some("mp4".to_string()),
            params: JobParams::BatchReencode {
                input_dir: input_dir.to_path_buf(),
                file_types: file_types.iter().map(|t| t.to_string()).collect(),
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
            },
        }
    }

    pub fn download_spec(&self, start: Option<&str>, end: Option<&str>) -> JobSpec {
        JobSpec {
            output_dir: self.output_dir(),
            output_name: "video".to_string(),
            extension: Some("mp4".to_string()),
            params: JobParams::Download {
                url: "https://example.com/watch?v=abc".to_string(),
                start_time: start.map(str::to_string),
                end_time: end.map(str::to_string),
                video_codec: None,
                audio_codec: None,
                quality: None,
                low_vram: false,
            },
        }
    }
}

/// Runs a job on a background thread and hands back the event stream.
pub fn spawn_job(
    executor: JobExecutor,
    spec: JobSpec,
    controller: TaskController,
) -> (std::thread::JoinHandle<JobOutcome>, Receiver<JobEvent>) {
    let (observer, rx) = JobObserver::channel();
    let handle = std::thread::spawn(move || executor.execute(1, &spec, &controller, observer));
    (handle, rx)
}

/// Waits for the first progress event that carries a percentage or an `out_time`.
pub fn wait_for_tool_progress(rx: &Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    loop {
        let event = rx.recv_timeout(EVENT_TIMEOUT).expect("progress event");
        let done = match &event {
            JobEvent::Progress { event, .. } => {
                event.percentage().is_some() || event.message().contains("00:00:01")
            }
            JobEvent::Finished(outcome) => panic!("finished early: {:?}", outcome),
        };
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Drains the remaining events; asserts exactly one `Finished`, and that it is last.
pub fn finish(rx: &Receiver<JobEvent>, mut seen: Vec<JobEvent>) -> (Vec<JobEvent>, JobOutcome) {
    loop {
        let event = rx.recv_timeout(EVENT_TIMEOUT).expect("job event");
        let finished = matches!(event, JobEvent::Finished(_));
        seen.push(event);
        if finished {
            break;
        }
    }
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "event after completion"
    );
    let Some(JobEvent::Finished(outcome)) = seen.last().cloned() else {
        unreachable!()
    };
    (seen, outcome)
}
