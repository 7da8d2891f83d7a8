//! Locate the external tools: explicit override, common install paths, then
//! `which`/`where`. Not cached; resolution runs once per job.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    YtDlp,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Ffmpeg, Tool::Ffprobe, Tool::YtDlp];

    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::YtDlp => "yt-dlp",
        }
    }

    /// Environment variable that overrides discovery.
    pub fn env_var(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "FFMPEG_PATH",
            Tool::Ffprobe => "FFPROBE_PATH",
            Tool::YtDlp => "YTDLP_PATH",
        }
    }

    fn install_hint(self) -> &'static str {
        match self {
            Tool::Ffmpeg | Tool::Ffprobe => {
                "Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            }
            Tool::YtDlp => {
                "Please install yt-dlp:\n  - macOS: brew install yt-dlp\n  - Linux: pipx install yt-dlp\n  - Windows: winget install yt-dlp"
            }
        }
    }

    fn file_name(self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.exe", self.binary_name())
        } else {
            self.binary_name().to_string()
        }
    }
}

fn find_in_path(tool: Tool) -> Option<PathBuf> {
    let finder = if cfg!(target_os = "windows") { "where" } else { "which" };
    let output = Command::new(finder).arg(tool.binary_name()).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/local/bin"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
/// A platform-suffixed `ffmpeg-<triple>` pairs with `ffprobe-<triple>`.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        && !suffix.is_empty()
    {
        #[cfg(target_os = "windows")]
        candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
        #[cfg(not(target_os = "windows"))]
        candidates.push(parent.join(format!("ffprobe{suffix}")));
    }
    candidates.push(parent.join(Tool::Ffprobe.file_name()));
    candidates
}

fn discover(tool: Tool) -> Option<PathBuf> {
    // Common paths first to avoid spawning which/where
    for dir in common_dirs() {
        let path = dir.join(tool.file_name());
        if path.exists() {
            log::debug!(
                target: "vidqueue::discovery",
                "{} found in common path: {}",
                tool.binary_name(),
                path.display()
            );
            return Some(path);
        }
    }
    if let Some(path) = find_in_path(tool).filter(|p| p.exists()) {
        log::debug!(
            target: "vidqueue::discovery",
            "{} found in PATH: {}",
            tool.binary_name(),
            path.display()
        );
        return Some(path);
    }
    None
}

/// Resolve a tool. `explicit` (from config) wins when it exists; ffprobe is also
/// looked up next to an overridden ffmpeg.
pub fn resolve_tool_path(
    tool: Tool,
    explicit: Option<&Path>,
    ffmpeg_hint: Option<&Path>,
) -> Result<PathBuf, AppError> {
    if let Some(path) = explicit {
        if path.exists() {
            log::debug!(
                target: "vidqueue::discovery",
                "{} path from {}: {}",
                tool.binary_name(),
                tool.env_var(),
                path.display()
            );
            return Ok(path.to_path_buf());
        }
        log::warn!(
            target: "vidqueue::discovery",
            "{} override does not exist: {}",
            tool.env_var(),
            path.display()
        );
    }

    if tool == Tool::Ffprobe
        && let Some(ffmpeg) = ffmpeg_hint
        && let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists())
    {
        return Ok(found);
    }

    discover(tool).ok_or_else(|| {
        log::error!(
            target: "vidqueue::discovery",
            "{} not found in PATH or common locations",
            tool.binary_name()
        );
        AppError::tool_not_found(tool.binary_name(), tool.install_hint())
    })
}
