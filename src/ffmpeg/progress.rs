use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use serde::Serialize;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+:\d+:\d+(?:\.\d+)?)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time=(\S+)").expect("invalid out_time regex"));
static DOWNLOAD_PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("invalid download percent regex")
});
static POSTPROCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(VideoConvertor|VideoRemuxer|Merger|FixupM3u8|FixupStretched|ExtractAudio)\]\s*(.*)$")
        .expect("invalid postprocessor regex")
});

/// Minimum interval between forwarded progress events.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Processing,
    Finished,
    Error,
}

/// One progress notification for a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ProgressEvent {
    Phase { phase: Phase, message: String },
    Percentage { percentage: f64, message: String },
}

impl ProgressEvent {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Phase {
            phase: Phase::Processing,
            message: message.into(),
        }
    }

    pub fn percentage(&self) -> Option<f64> {
        match self {
            Self::Percentage { percentage, .. } => Some(*percentage),
            Self::Phase { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Phase { message, .. } | Self::Percentage { message, .. } => message,
        }
    }
}

/// Parses `HH:MM:SS.fraction` into seconds. Any other shape yields 0.0.
pub fn parse_time_str(time_str: &str) -> f64 {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }
    let (Ok(hours), Ok(minutes), Ok(seconds)) = (
        parts[0].parse::<i64>(),
        parts[1].parse::<i64>(),
        parts[2].parse::<f64>(),
    ) else {
        return 0.0;
    };
    let total = hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds;
    if total.is_finite() { total } else { 0.0 }
}

/// Accumulates FFmpeg output for one run: the `Duration:` banner from stderr and
/// the `out_time=` keys written by `-progress pipe:1`.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    label: String,
    total_duration: f64,
}

impl ProgressParser {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total_duration: 0.0,
        }
    }

    /// Seeds the total duration (e.g. from ffprobe). Non-positive means unknown.
    pub fn with_duration(label: impl Into<String>, duration_secs: f64) -> Self {
        let mut parser = Self::new(label);
        if duration_secs.is_finite() && duration_secs > 0.0 {
            parser.total_duration = duration_secs;
        }
        parser
    }

    pub fn total_duration(&self) -> Option<f64> {
        (self.total_duration > 0.0).then_some(self.total_duration)
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if self.total_duration <= 0.0 {
            if let Some(caps) = DURATION_RE.captures(line) {
                self.total_duration = parse_time_str(&caps[1]);
                return None;
            }
        }

        let caps = OUT_TIME_RE.captures(line)?;
        let time_str = &caps[1];
        let current = parse_time_str(time_str);
        if self.total_duration > 0.0 {
            let percentage = (current / self.total_duration * 100.0).clamp(0.0, 100.0);
            Some(ProgressEvent::Percentage {
                percentage,
                message: format!("{}... {:.1}%", self.label, percentage),
            })
        } else {
            Some(ProgressEvent::Phase {
                phase: Phase::Processing,
                message: format!("{}... {}", self.label, time_str),
            })
        }
    }
}

/// Parses yt-dlp `--newline` output.
#[derive(Debug, Clone, Default)]
pub struct DownloadProgressParser;

impl DownloadProgressParser {
    pub fn feed(&mut self, line: &str) -> Option<ProgressEvent> {
        let line = line.trim();
        if let Some(caps) = DOWNLOAD_PERCENT_RE.captures(line) {
            let percentage = caps[1].parse::<f64>().ok()?.clamp(0.0, 100.0);
            return Some(ProgressEvent::Percentage {
                percentage,
                message: format!("Downloading... {:.1}%", percentage),
            });
        }
        let caps = POSTPROCESS_RE.captures(line)?;
        Some(ProgressEvent::processing(format!(
            "Post-processing ({})...",
            &caps[1]
        )))
    }
}

/// Drops events that arrive faster than a UI can use them. Percentages always
/// pass when they moved by at least one point or reached 100.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    last_percentage: f64,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self {
            last_emit: None,
            last_percentage: 0.0,
        }
    }
}

impl ProgressThrottle {
    pub fn should_emit(&mut self, event: &ProgressEvent) -> bool {
        let now = Instant::now();
        let elapsed_ok = self
            .last_emit
            .is_none_or(|t| now.duration_since(t) >= PROGRESS_EMIT_INTERVAL);
        let emit = match event.percentage() {
            Some(p) => elapsed_ok || (p - self.last_percentage).abs() >= 1.0 || p >= 100.0,
            None => elapsed_ok,
        };
        if emit {
            self.last_emit = Some(now);
            if let Some(p) = event.percentage() {
                self.last_percentage = p;
            }
        }
        emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_str_three_components() {
        assert_eq!(parse_time_str("01:02:03.5"), 3723.5);
        assert_eq!(parse_time_str("00:00:30.000000"), 30.0);
    }

    #[test]
    fn time_str_other_shapes_are_zero() {
        assert_eq!(parse_time_str(""), 0.0);
        assert_eq!(parse_time_str("02:03"), 0.0);
        assert_eq!(parse_time_str("N/A"), 0.0);
        assert_eq!(parse_time_str("1:2:3:4"), 0.0);
        assert_eq!(parse_time_str("aa:bb:cc"), 0.0);
    }

    #[test]
    fn duration_then_out_time_gives_percentage() {
        let mut parser = ProgressParser::new("Re-encoding");
        assert_eq!(parser.feed("  Duration: 00:01:00.00, start: 0.000000, bitrate: 1205 kb/s"), None);
        let event = parser.feed("out_time=00:00:30.00").expect("event");
        assert_eq!(event.percentage(), Some(50.0));
        assert_eq!(event.message(), "Re-encoding... 50.0%");
    }

    #[test]
    fn out_time_without_duration_is_message_only() {
        let mut parser = ProgressParser::new("Merging");
        let event = parser.feed("out_time=00:00:10.00").expect("event");
        assert_eq!(event.percentage(), None);
        assert_eq!(event.message(), "Merging... 00:00:10.00");
    }

    #[test]
    fn percentage_clamped_to_hundred() {
        let mut parser = ProgressParser::with_duration("Clipping", 10.0);
        let event = parser.feed("out_time=00:00:12.00").expect("event");
        assert_eq!(event.percentage(), Some(100.0));
    }

    #[test]
    fn first_duration_wins() {
        let mut parser = ProgressParser::new("Merging");
        parser.feed("Duration: 00:00:20.00, start: 0");
        parser.feed("Duration: 00:05:00.00, start: 0");
        assert_eq!(parser.total_duration(), Some(20.0));
    }

    #[test]
    fn seeded_duration_ignores_banner() {
        let mut parser = ProgressParser::with_duration("Merging", 40.0);
        parser.feed("Duration: 00:00:20.00, start: 0");
        let event = parser.feed("out_time=00:00:10.00").expect("event");
        assert_eq!(event.percentage(), Some(25.0));
    }

    #[test]
    fn unrelated_lines_ignored() {
        let mut parser = ProgressParser::with_duration("Clipping", 10.0);
        for line in ["frame=120", "fps=30.0", "out_time_ms=5000000", "progress=continue", ""] {
            assert_eq!(parser.feed(line), None, "line {line:?}");
        }
    }

    #[test]
    fn download_percent_lines() {
        let mut parser = DownloadProgressParser;
        let event = parser
            .feed("[download]  42.3% of   10.00MiB at    1.00MiB/s ETA 00:05")
            .expect("event");
        assert_eq!(event.percentage(), Some(42.3));
        assert_eq!(parser.feed("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn download_postprocessor_lines_are_phases() {
        let mut parser = DownloadProgressParser;
        let event = parser
            .feed("[VideoConvertor] Converting video from webm to mp4")
            .expect("event");
        assert!(matches!(event, ProgressEvent::Phase { phase: Phase::Processing, .. }));
    }

    #[test]
    fn throttle_passes_large_steps_and_completion() {
        let mut throttle = ProgressThrottle::default();
        let at = |p: f64| ProgressEvent::Percentage {
            percentage: p,
            message: String::new(),
        };
        assert!(throttle.should_emit(&at(0.1)));
        assert!(!throttle.should_emit(&at(0.5)));
        assert!(throttle.should_emit(&at(5.0)));
        assert!(throttle.should_emit(&at(100.0)));
    }
}
