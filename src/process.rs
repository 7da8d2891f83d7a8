//! OS process control behind a small trait, so the controller never touches a
//! platform API directly.
//!
//! Every operation reaches the whole tree the tool started, not just the tool:
//! on Unix the child leads its own process group and signals go to the group;
//! on Windows descendants are found through a Toolhelp snapshot and the tree
//! is killed with `taskkill /T`.
//!
//! Operations on processes that have already exited succeed without doing
//! anything: "no such process" counts as terminated.

use std::io;
use std::process::{Child, Command, ExitStatus};

use parking_lot::Mutex;

pub trait ProcessHandle: Send + Sync {
    fn id(&self) -> u32;
    /// Graceful termination request (SIGTERM on Unix).
    fn terminate(&self) -> io::Result<()>;
    fn kill(&self) -> io::Result<()>;
    /// Suspends the process at the scheduler level.
    fn suspend(&self) -> io::Result<()>;
    fn resume(&self) -> io::Result<()>;
}

/// Spawns `cmd` as the root of its own process tree. `ChildProcess` expects
/// children started this way.
pub fn spawn_in_group(cmd: &mut Command) -> io::Result<Child> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
}

/// A spawned child shared between the runner (which owns it) and the
/// controller (which holds only a `Weak`).
///
/// The child is reaped only under the lock, so a signal sent while the lock is
/// held and `try_wait` reports "still running" cannot hit a recycled pid.
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().try_wait()
    }

    /// Runs `op` with the child and whether its root process is still running.
    fn with_child(&self, op: impl FnOnce(&mut Child, bool) -> io::Result<()>) -> io::Result<()> {
        let mut child = self.child.lock();
        let running = child.try_wait()?.is_none();
        op(&mut child, running)
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate(&self) -> io::Result<()> {
        self.with_child(sys::terminate)
    }

    fn kill(&self) -> io::Result<()> {
        self.with_child(sys::kill)
    }

    fn suspend(&self) -> io::Result<()> {
        self.with_child(|child, running| sys::suspend(child.id(), running))
    }

    fn resume(&self) -> io::Result<()> {
        self.with_child(|child, running| sys::resume(child.id(), running))
    }
}

/// Unix: the group outlives its leader while any member runs, and a group id
/// is not handed out again while the group exists, so the group is signalled
/// even after the leader was reaped.
#[cfg(unix)]
mod sys {
    use std::io;
    use std::process::Child;

    fn signal_group(pgid: u32, sig: libc::c_int) -> io::Result<()> {
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid addresses the
        // process group the child leads.
        let rc = unsafe { libc::kill(-(pgid as libc::pid_t), sig) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    pub fn terminate(child: &mut Child, _running: bool) -> io::Result<()> {
        signal_group(child.id(), libc::SIGTERM)
    }

    pub fn kill(child: &mut Child, _running: bool) -> io::Result<()> {
        signal_group(child.id(), libc::SIGKILL)
    }

    pub fn suspend(pgid: u32, _running: bool) -> io::Result<()> {
        signal_group(pgid, libc::SIGSTOP)
    }

    pub fn resume(pgid: u32, _running: bool) -> io::Result<()> {
        signal_group(pgid, libc::SIGCONT)
    }
}

/// Windows: pids are recycled as soon as the root is reaped, so nothing is
/// signalled once it has exited.
#[cfg(windows)]
mod sys {
    use std::collections::HashSet;
    use std::io;
    use std::process::{Child, Stdio};

    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
    };
    use windows_sys::Win32::System::Threading::{
        OpenThread, ResumeThread, SuspendThread, THREAD_SUSPEND_RESUME,
    };

    use crate::ffmpeg::runner::hidden_command;

    /// Windows has no graceful signal for console-less children; terminate is a
    /// forced tree kill.
    pub fn terminate(child: &mut Child, running: bool) -> io::Result<()> {
        kill(child, running)
    }

    pub fn kill(child: &mut Child, running: bool) -> io::Result<()> {
        if !running {
            return Ok(());
        }
        let status = hidden_command("taskkill")
            .args(["/PID", &child.id().to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if matches!(status, Ok(s) if s.success()) {
            return Ok(());
        }
        match child.kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    /// `root` plus every process whose parent chain leads to it.
    fn process_tree(root: u32) -> io::Result<HashSet<u32>> {
        let mut links: Vec<(u32, u32)> = Vec::new();
        // SAFETY: the snapshot handle is checked and closed; PROCESSENTRY32W is plain data
        // initialized with its size as the API requires.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(io::Error::last_os_error());
            }
            let mut entry: PROCESSENTRY32W = std::mem::zeroed();
            entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
            let mut ok = Process32FirstW(snapshot, &mut entry);
            while ok != 0 {
                links.push((entry.th32ProcessID, entry.th32ParentProcessID));
                ok = Process32NextW(snapshot, &mut entry);
            }
            CloseHandle(snapshot);
        }

        let mut tree = HashSet::from([root]);
        loop {
            let before = tree.len();
            for (pid, parent) in &links {
                if *pid != *parent && tree.contains(parent) {
                    tree.insert(*pid);
                }
            }
            if tree.len() == before {
                return Ok(tree);
            }
        }
    }

    fn for_each_thread(pids: &HashSet<u32>, op: impl Fn(HANDLE)) -> io::Result<()> {
        // SAFETY: snapshot and thread handles are checked and closed below; THREADENTRY32 is
        // plain data initialized with its size as the API requires.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return Err(io::Error::last_os_error());
            }
            let mut entry: THREADENTRY32 = std::mem::zeroed();
            entry.dwSize = std::mem::size_of::<THREADENTRY32>() as u32;
            let mut ok = Thread32First(snapshot, &mut entry);
            while ok != 0 {
                if pids.contains(&entry.th32OwnerProcessID) {
                    let thread = OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID);
                    if !thread.is_null() {
                        op(thread);
                        CloseHandle(thread);
                    }
                }
                ok = Thread32Next(snapshot, &mut entry);
            }
            CloseHandle(snapshot);
        }
        Ok(())
    }

    pub fn suspend(pid: u32, running: bool) -> io::Result<()> {
        if !running {
            return Ok(());
        }
        // SAFETY: the handle was opened with THREAD_SUSPEND_RESUME.
        for_each_thread(&process_tree(pid)?, |thread| unsafe {
            SuspendThread(thread);
        })
    }

    pub fn resume(pid: u32, running: bool) -> io::Result<()> {
        if !running {
            return Ok(());
        }
        // SAFETY: the handle was opened with THREAD_SUSPEND_RESUME.
        for_each_thread(&process_tree(pid)?, |thread| unsafe {
            ResumeThread(thread);
        })
    }
}
