//! Engine configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::ffmpeg::discovery::{Tool, resolve_tool_path};
use crate::ffmpeg::RunSettings;

pub const POLL_MS_ENV: &str = "VIDQUEUE_POLL_MS";
pub const STOP_GRACE_MS_ENV: &str = "VIDQUEUE_STOP_GRACE_MS";
pub const DIAGNOSTIC_LINES_ENV: &str = "VIDQUEUE_DIAGNOSTIC_LINES";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub run: RunSettings,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |tool: Tool| {
            lookup(tool.env_var())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    log::warn!(target: "vidqueue::config", "Ignoring invalid {}={:?}", key, raw);
                    None
                }
            }
        };

        let mut run = RunSettings::default();
        if let Some(ms) = number(POLL_MS_ENV).filter(|&ms| ms > 0) {
            run.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = number(STOP_GRACE_MS_ENV) {
            run.stop_grace = Duration::from_millis(ms);
        }
        if let Some(lines) = number(DIAGNOSTIC_LINES_ENV) {
            run.diagnostic_lines = lines as usize;
        }

        Self {
            ffmpeg_path: path(Tool::Ffmpeg),
            ffprobe_path: path(Tool::Ffprobe),
            ytdlp_path: path(Tool::YtDlp),
            run,
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        self.run
    }

    pub fn tool_path(&self, tool: Tool) -> Result<PathBuf, AppError> {
        let explicit = match tool {
            Tool::Ffmpeg => self.ffmpeg_path.as_deref(),
            Tool::Ffprobe => self.ffprobe_path.as_deref(),
            Tool::YtDlp => self.ytdlp_path.as_deref(),
        };
        resolve_tool_path(tool, explicit, self.ffmpeg_path.as_deref())
    }
}
