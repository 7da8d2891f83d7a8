//! Engine error type. Every failure a job can hit ends up as one of these
//! variants before it is turned into a terminal job state.

use crate::ffmpeg::{ErrorPayload, parse_tool_error};

pub const STOPPED_MESSAGE: &str = "Stopped by user";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} not found. {detail}")]
    ToolNotFound { tool: String, detail: String },

    #[error("{tool}: process failed with code {code}")]
    ToolFailed {
        tool: String,
        code: i32,
        tail: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Download failed with both strategies. Direct extraction: {primary}. Fallback: {fallback}")]
    FallbackExhausted { primary: String, fallback: String },

    #[error(
        "Batch re-encoding finished with {succeeded} successes and {} failures: {}",
        .failed.len(),
        .failed.join("; ")
    )]
    BatchIncomplete { succeeded: usize, failed: Vec<String> },

    #[error("Stopped by user")]
    Stopped,

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn tool_not_found(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    pub fn tool_failed(tool: impl Into<String>, code: i32, tail: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            code,
            tail: tail.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Display text plus the captured tool output, for completion messages.
    pub fn full_message(&self) -> String {
        match self {
            Self::ToolFailed { tail, .. } if !tail.trim().is_empty() => {
                format!("{}\nOutput:\n{}", self, tail.trim_end())
            }
            _ => self.to_string(),
        }
    }

    /// `{summary, detail}` for protocol replies. Tool failures are summarized
    /// from their exit code and output; everything else repeats its message.
    pub fn payload(&self) -> ErrorPayload {
        match self {
            Self::ToolFailed { tool, code, tail } => parse_tool_error(tool, *code, tail),
            _ => {
                let text = self.to_string();
                ErrorPayload {
                    summary: text.clone(),
                    detail: text,
                }
            }
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == STOPPED_MESSAGE {
            AppError::Stopped
        } else {
            AppError::Internal(s)
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_stopped_string() {
        let e = AppError::from("Stopped by user");
        assert!(e.is_stopped());
    }

    #[test]
    fn from_other_string() {
        let e = AppError::from("some error message");
        match &e {
            AppError::Internal(msg) => assert_eq!(msg, "some error message"),
            _ => panic!("expected Internal"),
        }
    }

    #[test]
    fn tool_failed_display_carries_exit_code() {
        let e = AppError::tool_failed("ffmpeg", 1, "Invalid data found");
        assert_eq!(e.to_string(), "ffmpeg: process failed with code 1");
        assert!(e.full_message().ends_with("Invalid data found"));
    }

    #[test]
    fn payload_summarizes_tool_failure_and_keeps_output() {
        let e = AppError::tool_failed("ffmpeg", 1, "in.mp4: No such file or directory\nConversion failed!");
        let payload = e.payload();
        assert_eq!(payload.summary, "ffmpeg: in.mp4: No such file or directory");
        assert!(payload.detail.ends_with("Conversion failed!"));

        let payload = AppError::invalid_input("empty url").payload();
        assert_eq!(payload.summary, "Invalid input: empty url");
        assert_eq!(payload.summary, payload.detail);
    }

    #[test]
    fn tool_not_found_is_distinct_from_tool_failure() {
        let missing = AppError::tool_not_found("ffmpeg", "Install FFmpeg.");
        assert!(missing.to_string().starts_with("ffmpeg not found"));
        assert!(!missing.to_string().contains("process failed"));
    }

    #[test]
    fn fallback_exhausted_keeps_both_diagnostics() {
        let e = AppError::FallbackExhausted {
            primary: "ffmpeg: process failed with code 1".into(),
            fallback: "yt-dlp: process failed with code 2".into(),
        };
        let text = e.to_string();
        assert!(text.contains("code 1"));
        assert!(text.contains("code 2"));
    }
}
