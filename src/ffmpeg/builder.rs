//! Default FFmpeg argument construction for each job kind.
//!
//! The engine only depends on the `CommandBuilder` trait; this module is the
//! stock policy (stream copy where possible, HEVC NVENC for precise cuts).

use std::path::{Path, PathBuf};

use super::discovery::Tool;
use super::ffprobe::probe_duration;
use super::runner::{ToolCommand, path_to_string};
use super::temp::write_concat_list;
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::job::{ClipMode, JobParams, JobSpec, trim_range};
use crate::strategy::DownloadSource;

/// Video codec value selecting the HEVC NVENC quality preset.
pub const BEST_VIDEO_CODEC: &str = "best";
pub const COPY_CODEC: &str = "copy";
const DEFAULT_BEST_CQ: u32 = 30;

/// A command ready to run, plus what the worker needs around it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCommand {
    pub command: ToolCommand,
    /// Total output duration when known up front; otherwise parsed from the banner.
    pub known_duration: Option<f64>,
    /// Removed by the worker after the run, whatever the outcome.
    pub temp_files: Vec<PathBuf>,
}

pub trait CommandBuilder: Send + Sync {
    /// `Ok(None)` means this job has no direct command (download falls back).
    fn build(&self, job: &JobSpec, output: &Path) -> Result<Option<PreparedCommand>, AppError>;
}

/// Extra encoder flags that keep hardware encoders' VRAM use low.
pub fn get_low_vram_args(codec: &str) -> Vec<String> {
    let args: &[&str] = match codec {
        "hevc_nvenc" | "h264_nvenc" => &["-preset", "p1", "-rc-lookahead", "0", "-surfaces", "0", "-delay", "0"],
        "hevc_amf" | "h264_amf" => &["-quality", "speed", "-rc", "cbr"],
        "hevc_qsv" | "h264_qsv" => &["-preset", "veryfast"],
        _ => &[],
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// Trim and codec arguments handed to the download tool's FFmpeg post-processor.
pub fn download_postprocessor_args(
    start_time: Option<&str>,
    end_time: Option<&str>,
    video_codec: Option<&str>,
    audio_codec: Option<&str>,
    quality: Option<u32>,
    low_vram: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if let Some(start) = start_time {
        args.extend(["-ss".into(), start.to_string()]);
    }
    if let Some(end) = end_time {
        args.extend(["-to".into(), end.to_string()]);
    }
    args.extend(download_codec_args(video_codec, audio_codec, quality, low_vram));
    args
}

/// Codec flags for a download job's video/audio codec, quality and low-VRAM choice.
pub fn download_codec_args(
    video_codec: Option<&str>,
    audio_codec: Option<&str>,
    quality: Option<u32>,
    low_vram: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match video_codec {
        Some(BEST_VIDEO_CODEC) => {
            let cq = quality.unwrap_or(DEFAULT_BEST_CQ).to_string();
            args.extend(
                ["-c:v", "hevc_nvenc", "-preset", "p7", "-cq", cq.as_str(), "-c:a", "copy"]
                    .map(String::from),
            );
            if low_vram {
                args.extend(get_low_vram_args("hevc_nvenc"));
            }
            // The preset already fixes the audio codec.
            return args;
        }
        Some(COPY_CODEC) => args.extend(["-c:v".into(), COPY_CODEC.into()]),
        Some(codec) if !codec.is_empty() => {
            args.extend(["-c:v".into(), codec.to_string()]);
            if low_vram {
                args.extend(get_low_vram_args(codec));
            }
        }
        _ => {}
    }
    if let Some(codec) = audio_codec.filter(|c| !c.is_empty()) {
        args.extend(["-c:a".into(), codec.to_string()]);
    }
    args
}

fn seconds_arg(secs: f64) -> String {
    format!("{:.3}", secs)
}

/// Arguments shared by every FFmpeg run: overwrite, machine-readable progress on stdout.
fn progress_args(args: &mut Vec<String>) {
    args.extend(["-progress", "pipe:1", "-nostats", "-y"].map(String::from));
}

/// Input-seeking cut: `-ss` before `-i`, duration via `-t`.
fn cut_args(input: &str, start: f64, end: f64) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-ss".into(),
        seconds_arg(start),
        "-i".into(),
        input.to_string(),
        "-t".into(),
        seconds_arg(end - start),
    ]
}

pub fn build_clip_args(input: &str, output: &Path, start: f64, end: f64, mode: ClipMode) -> Vec<String> {
    let mut args = cut_args(input, start, end);
    match mode {
        ClipMode::StreamCopy => args.extend(["-c".into(), COPY_CODEC.into()]),
        ClipMode::Precise => args.extend(
            [
                "-c:v", "hevc_nvenc", "-preset", "p5", "-qp", "18", "-bf", "4", "-b_ref_mode",
                "middle", "-c:a", "aac", "-b:a", "192k",
            ]
            .map(String::from),
        ),
    }
    args.extend(["-avoid_negative_ts", "make_zero"].map(String::from));
    progress_args(&mut args);
    args.push(path_to_string(output));
    args
}

/// Direct cut for a download job. Local files honour the "best" preset; every
/// other codec choice, and every network source, is stream-copied.
#[allow(clippy::too_many_arguments)]
pub fn build_download_cut_args(
    input: &str,
    output: &Path,
    start: f64,
    end: f64,
    local: bool,
    video_codec: Option<&str>,
    quality: Option<u32>,
    low_vram: bool,
) -> Vec<String> {
    let mut args = cut_args(input, start, end);
    if local && video_codec == Some(BEST_VIDEO_CODEC) {
        args.extend(download_codec_args(video_codec, None, quality, low_vram));
    } else {
        args.extend(["-c".into(), COPY_CODEC.into()]);
    }
    args.extend(["-avoid_negative_ts", "make_zero"].map(String::from));
    progress_args(&mut args);
    args.push(path_to_string(output));
    args
}

pub fn build_reencode_args(input: &Path, output: &Path, video_codec: &str, audio_codec: &str) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-i".to_string(),
        path_to_string(input),
        "-c:v".to_string(),
        video_codec.to_string(),
        "-c:a".to_string(),
        audio_codec.to_string(),
    ];
    progress_args(&mut args);
    args.push(path_to_string(output));
    args
}

pub fn build_merge_args(concat_list: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_to_string(concat_list),
        "-c".to_string(),
        COPY_CODEC.to_string(),
    ];
    progress_args(&mut args);
    args.push(path_to_string(output));
    args
}

/// One `-flag value` pair per line, for logs.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Builds FFmpeg commands, resolving tool paths through the config.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommandBuilder {
    config: EngineConfig,
}

impl FfmpegCommandBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn merge_duration(&self, inputs: &[PathBuf]) -> Option<f64> {
        let ffprobe = match self.config.tool_path(Tool::Ffprobe) {
            Ok(path) => path,
            Err(e) => {
                log::debug!(target: "vidqueue::builder", "Merge duration unknown: {}", e);
                return None;
            }
        };
        let total: f64 = inputs.iter().map(|p| probe_duration(&ffprobe, p)).sum();
        (total > 0.0).then_some(total)
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build(&self, job: &JobSpec, output: &Path) -> Result<Option<PreparedCommand>, AppError> {
        let (args, known_duration, temp_files) = match &job.params {
            JobParams::Download {
                url,
                start_time,
                end_time,
                video_codec,
                quality,
                low_vram,
                ..
            } => {
                let (Some(start), Some(end)) = (start_time.as_deref(), end_time.as_deref()) else {
                    return Ok(None);
                };
                let (start, end) = trim_range(start, end)?;
                let (input, local) = match DownloadSource::classify(url)? {
                    DownloadSource::Network(url) => (url.to_string(), false),
                    DownloadSource::Local(path) => (path_to_string(&path), true),
                };
                let args = build_download_cut_args(
                    &input,
                    output,
                    start,
                    end,
                    local,
                    video_codec.as_deref(),
                    *quality,
                    *low_vram,
                );
                (args, Some(end - start), Vec::new())
            }
            JobParams::Clip {
                input,
                start_time,
                end_time,
                mode,
            } => {
                let (start, end) = trim_range(start_time, end_time)?;
                let args = build_clip_args(&path_to_string(input), output, start, end, *mode);
                (args, Some(end - start), Vec::new())
            }
            JobParams::Reencode {
                input,
                video_codec,
                audio_codec,
            } => (
                build_reencode_args(input, output, video_codec, audio_codec),
                None,
                Vec::new(),
            ),
            // Expanded into one Reencode command per file by the batch runner.
            JobParams::BatchReencode { .. } => return Ok(None),
            JobParams::Merge { inputs } => {
                let list = write_concat_list(inputs)?;
                let duration = self.merge_duration(inputs);
                (build_merge_args(&list, output), duration, vec![list])
            }
        };

        let ffmpeg = self.config.tool_path(Tool::Ffmpeg).inspect_err(|_| {
            super::temp::remove_temp_files(&temp_files);
        })?;
        log::debug!(
            target: "vidqueue::builder",
            "Built {} command:\n{}",
            job.kind().as_str(),
            format_args_for_display_multiline(&args)
        );
        Ok(Some(PreparedCommand {
            command: ToolCommand::new(ffmpeg, args),
            known_duration,
            temp_files,
        }))
    }
}
