//! Short summaries for failed tool runs.
//!
//! The runner reports a normal exit code as-is and a death by signal N as
//! 128+N (Unix). Spawn failures never get here; they are `ToolNotFound`.
//! yt-dlp exits 1 on download errors, 2 on bad options, 100 when it must be
//! restarted after an update and 101 when a download limit cut it short.

use serde::Serialize;

const SUMMARY_MAX_LEN: usize = 160;
const ELLIPSIS: &str = "…";

/// `{summary, detail}` pair sent to frontends. Detail is the captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_tool_error(tool: &str, code: i32, tail: &str) -> ErrorPayload {
    let summary = signal_summary(tool, code)
        .or_else(|| ytdlp_summary(tool, code))
        .or_else(|| {
            reported_error(tail).map(|line| truncate(&format!("{}: {}", tool, line), SUMMARY_MAX_LEN))
        })
        .unwrap_or_else(|| format!("{} failed (exit code {}).", tool, code));
    ErrorPayload {
        summary,
        detail: tail.trim().to_string(),
    }
}

fn signal_summary(tool: &str, code: i32) -> Option<String> {
    if !cfg!(unix) || !(129..=128 + 64).contains(&code) {
        return None;
    }
    let how = match code - 128 {
        2 => "was interrupted (SIGINT)".to_string(),
        6 => "aborted (SIGABRT)".to_string(),
        9 => "was killed (SIGKILL), possibly by the out-of-memory killer".to_string(),
        11 => "crashed (SIGSEGV)".to_string(),
        15 => "was terminated (SIGTERM)".to_string(),
        n => format!("died from signal {}", n),
    };
    Some(format!("{} {}.", tool, how))
}

fn ytdlp_summary(tool: &str, code: i32) -> Option<String> {
    if !tool.eq_ignore_ascii_case("yt-dlp") {
        return None;
    }
    match code {
        2 => Some("yt-dlp rejected its command line options.".into()),
        100 => Some("yt-dlp must be restarted after an update.".into()),
        101 => Some("yt-dlp stopped early: download limit reached.".into()),
        _ => None,
    }
}

/// The line that best explains the failure: yt-dlp's last `ERROR:` line, else
/// the last output line that is neither a progress key nor FFmpeg's generic
/// closing message.
fn reported_error(tail: &str) -> Option<&str> {
    let lines = || tail.lines().map(str::trim).filter(|l| !l.is_empty());
    if let Some(line) = lines().rev().find(|l| l.starts_with("ERROR:")) {
        return Some(line.trim_start_matches("ERROR:").trim());
    }
    lines()
        .rev()
        .find(|l| !is_progress_key(l) && *l != "Conversion failed!")
}

fn is_progress_key(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn signal_exit_codes_name_the_signal() {
        assert_eq!(
            parse_tool_error("ffmpeg", 137, "").summary,
            "ffmpeg was killed (SIGKILL), possibly by the out-of-memory killer."
        );
        assert_eq!(parse_tool_error("ffmpeg", 139, "").summary, "ffmpeg crashed (SIGSEGV).");
        assert_eq!(parse_tool_error("yt-dlp", 143, "").summary, "yt-dlp was terminated (SIGTERM).");
        assert_eq!(parse_tool_error("ffmpeg", 138, "").summary, "ffmpeg died from signal 10.");
    }

    #[test]
    fn ytdlp_error_line_becomes_summary() {
        let tail = "[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Video unavailable\n";
        let p = parse_tool_error("yt-dlp", 1, tail);
        assert_eq!(p.summary, "yt-dlp: [youtube] abc: Video unavailable");
        assert_eq!(p.detail, tail.trim());
    }

    #[test]
    fn ytdlp_specific_codes() {
        assert!(parse_tool_error("yt-dlp", 2, "usage: yt-dlp").summary.contains("options"));
        assert!(parse_tool_error("yt-dlp", 101, "").summary.contains("limit"));
        // Same codes from another tool fall through to the output.
        assert_eq!(parse_tool_error("ffmpeg", 2, "bad").summary, "ffmpeg: bad");
    }

    #[test]
    fn ffmpeg_skips_progress_keys_and_generic_closing_line() {
        let tail = "out_time=00:00:01.000000\nprogress=continue\n\
                    input.mp4: Invalid data found when processing input\nConversion failed!";
        let p = parse_tool_error("ffmpeg", 1, tail);
        assert_eq!(p.summary, "ffmpeg: input.mp4: Invalid data found when processing input");
    }

    #[test]
    fn empty_output_falls_back_to_exit_code() {
        let p = parse_tool_error("ffmpeg", 42, "\n\n");
        assert_eq!(p.summary, "ffmpeg failed (exit code 42).");
        assert_eq!(p.detail, "");
    }

    #[test]
    fn long_line_truncated_on_char_boundary() {
        let long = "é".repeat(200);
        let p = parse_tool_error("ffmpeg", 1, &long);
        assert!(p.summary.len() <= SUMMARY_MAX_LEN);
        assert!(p.summary.ends_with('…'));
    }
}
