//! FFprobe-based media metadata. Used for the merge duration seed and the
//! sidecar's `media.probe`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ffmpeg::runner::hidden_command;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub codec_type: String,
    pub codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Seconds; 0.0 when ffprobe could not tell.
    pub duration: f64,
    pub size: u64,
    pub bit_rate: Option<u64>,
    pub format_name: Option<String>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let bit_rate = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let format_name = format.and_then(|f| f.format_name.clone());

    let streams = output
        .streams
        .unwrap_or_default()
        .into_iter()
        .map(|s| StreamInfo {
            codec_type: s.codec_type.unwrap_or_else(|| "unknown".to_string()),
            codec_name: s.codec_name,
            width: s.width,
            height: s.height,
            fps: s.r_frame_rate.as_deref().and_then(parse_frame_rate),
            channels: s.channels,
        })
        .collect();

    Ok(MediaInfo {
        duration,
        size,
        bit_rate,
        format_name,
        streams,
    })
}

/// Run ffprobe on a media file.
pub fn probe_media(ffprobe: &Path, path: &Path) -> Result<MediaInfo, AppError> {
    log::debug!(
        target: "vidqueue::ffprobe",
        "probe_media: path={}",
        path.display()
    );

    let output = hidden_command(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::tool_not_found("ffprobe", e.to_string())
            } else {
                AppError::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::tool_failed(
            "ffprobe",
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        ));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;
    parse_ffprobe_json(&json)
}

/// Duration of a file in seconds, 0.0 when it cannot be probed.
pub fn probe_duration(ffprobe: &Path, path: &Path) -> f64 {
    match probe_media(ffprobe, path) {
        Ok(info) => info.duration,
        Err(e) => {
            log::debug!(
                target: "vidqueue::ffprobe",
                "No duration for {}: {}",
                path.display(),
                e
            );
            0.0
        }
    }
}
