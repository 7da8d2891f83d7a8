//! Stoppable external process runner.
//!
//! Spawns FFmpeg (or any tool with a line-oriented output) with both pipes
//! captured, merges stdout and stderr into one line stream via reader threads,
//! and polls the job's `TaskController` between lines and on every poll tick so
//! a silent process can still be paused or stopped.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use super::progress::{ProgressEvent, ProgressParser, ProgressThrottle};
use crate::controller::{Attachment, TaskController};
use crate::error::AppError;
use crate::process::{ChildProcess, ProcessHandle, spawn_in_group};

/// Upper bound on the sleep between exit checks once the output streams closed.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Program plus arguments, without the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Short tool name for messages: file stem of the program path.
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// Timing knobs for one run. See `EngineConfig` for the env overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Bound on how long stop/pause changes go unnoticed while the process is silent.
    pub poll_interval: Duration,
    /// Time a terminated process gets to exit before it is killed.
    pub stop_grace: Duration,
    /// Number of trailing output lines kept for failure diagnostics.
    pub diagnostic_lines: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stop_grace: Duration::from_secs(2),
            diagnostic_lines: 10,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Success,
    Stopped,
    Failed(AppError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn diagnostic(&self) -> String {
        match self {
            Self::Success => "success".to_string(),
            Self::Stopped => "stopped by user".to_string(),
            Self::Failed(e) => e.to_string(),
        }
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            Self::Success => Ok(()),
            Self::Stopped => Err(AppError::Stopped),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Command with no console window on Windows.
pub fn hidden_command(program: impl AsRef<OsStr>) -> Command {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        let mut cmd = Command::new(program);
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }
    #[cfg(not(windows))]
    {
        Command::new(program)
    }
}

struct DetachOnDrop<'a>(&'a TaskController);

impl Drop for DetachOnDrop<'_> {
    fn drop(&mut self) {
        self.0.detach();
    }
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if tx.send(line).is_err() {
                break;
            }
            line_buf.clear();
        }
    })
}

fn push_tail(tail: &mut VecDeque<String>, line: &str, limit: usize) {
    if limit == 0 {
        return;
    }
    if tail.len() == limit {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn wait_for_exit(process: &ChildProcess, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match process.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
            _ => return None,
        }
    }
}

/// Resume, terminate, wait out the grace period, then kill whatever is left of
/// the tree. The final kill also reaches helpers the tool left behind after
/// it exited on its own.
fn stop_process(process: &ChildProcess, settings: &RunSettings) {
    let _ = process.resume();
    if let Err(e) = process.terminate() {
        log::warn!(
            target: "vidqueue::runner",
            "Failed to terminate process {}: {}",
            process.id(),
            e
        );
    }
    let exited = wait_for_exit(process, settings.stop_grace).is_some();
    if !exited {
        log::info!(
            target: "vidqueue::runner",
            "Process {} ignored termination for {:?}; killing",
            process.id(),
            settings.stop_grace
        );
    }
    if let Err(e) = process.kill() {
        log::warn!(target: "vidqueue::runner", "Failed to kill process {}: {}", process.id(), e);
    }
    if !exited {
        let _ = wait_for_exit(process, settings.stop_grace);
    }
}

fn stopped(process: &ChildProcess, tool: &str, settings: &RunSettings) -> RunOutcome {
    log::info!(target: "vidqueue::runner", "Stopping {} (pid {})", tool, process.id());
    stop_process(process, settings);
    RunOutcome::Stopped
}

/// Run `command` to completion, forwarding each output line to `on_line`.
///
/// Never deletes files. Stop wins over whatever exit code the process produced.
pub fn run_stoppable(
    command: &ToolCommand,
    controller: &TaskController,
    settings: &RunSettings,
    on_line: &mut dyn FnMut(&str),
) -> RunOutcome {
    if controller.is_stopped() {
        return RunOutcome::Stopped;
    }

    let tool = command.tool_name();
    log::debug!(
        target: "vidqueue::runner",
        "Spawning {}: path={}, args={:?}",
        tool,
        command.program.display(),
        command.args
    );

    let mut cmd = hidden_command(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = match spawn_in_group(&mut cmd) {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::error!(target: "vidqueue::runner", "{} could not be started: {}", tool, e);
            return RunOutcome::Failed(AppError::tool_not_found(
                tool,
                format!("Could not start {}: {}", command.program.display(), e),
            ));
        }
        Err(e) => return RunOutcome::Failed(AppError::Io(e)),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let process = Arc::new(ChildProcess::new(child));
    let handle: Arc<dyn ProcessHandle> = process.clone();
    let _detach = DetachOnDrop(controller);
    if controller.attach_process(&handle) == Attachment::Stopped {
        return stopped(&process, &tool, settings);
    }

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = stdout {
        readers.push(spawn_reader(out, tx.clone()));
    }
    if let Some(err) = stderr {
        readers.push(spawn_reader(err, tx.clone()));
    }
    drop(tx);

    let mut tail = VecDeque::with_capacity(settings.diagnostic_lines);
    loop {
        if controller.is_stopped() {
            // Readers may still be blocked on a pipe held open by a grandchild; leave them.
            return stopped(&process, &tool, settings);
        }
        if controller.is_paused() && controller.wait_while_paused(settings.poll_interval) {
            return stopped(&process, &tool, settings);
        }
        let line = match rx.recv_timeout(settings.poll_interval) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        push_tail(&mut tail, &line, settings.diagnostic_lines);
        if controller.is_stopped() {
            return stopped(&process, &tool, settings);
        }
        if catch_unwind(AssertUnwindSafe(|| on_line(&line))).is_err() {
            log::warn!(
                target: "vidqueue::runner",
                "Line callback panicked for {}; continuing",
                tool
            );
        }
    }
    for reader in readers {
        let _ = reader.join();
    }

    let status = loop {
        if controller.is_stopped() {
            return stopped(&process, &tool, settings);
        }
        match process.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(settings.poll_interval.min(EXIT_POLL)),
            Err(e) => return RunOutcome::Failed(AppError::Io(e)),
        }
    };

    if controller.is_stopped() {
        return RunOutcome::Stopped;
    }
    if status.success() {
        log::info!(target: "vidqueue::runner", "{} completed successfully", tool);
        return RunOutcome::Success;
    }

    let code = exit_code(&status);
    let tail = Vec::from(tail).join("\n");
    log::error!(
        target: "vidqueue::runner",
        "{} failed (code={}): {}",
        tool,
        code,
        tail.lines().rev().take(3).collect::<Vec<_>>().join("; ")
    );
    RunOutcome::Failed(AppError::tool_failed(tool, code, tail))
}

/// `run_stoppable` with FFmpeg progress parsing: throttled events labelled
/// `"{label}... N%"` go to `emit`.
pub fn run_with_progress(
    command: &ToolCommand,
    known_duration: Option<f64>,
    label: &str,
    controller: &TaskController,
    settings: &RunSettings,
    emit: &mut dyn FnMut(ProgressEvent),
) -> RunOutcome {
    let mut parser = match known_duration {
        Some(duration) => ProgressParser::with_duration(label, duration),
        None => ProgressParser::new(label),
    };
    let mut throttle = ProgressThrottle::default();
    run_stoppable(command, controller, settings, &mut |line| {
        if let Some(event) = parser.feed(line)
            && throttle.should_emit(&event)
        {
            emit(event);
        }
    })
}

/// Path to string for tool args or logging.
pub fn path_to_string(path: &(impl AsRef<Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
