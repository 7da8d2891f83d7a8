pub mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
pub mod runner;
pub mod temp;

pub use builder::{CommandBuilder, FfmpegCommandBuilder, PreparedCommand};
pub use discovery::Tool;
pub use error::{ErrorPayload, parse_tool_error};
pub use ffprobe::{MediaInfo, StreamInfo, probe_media};
pub use progress::{
    DownloadProgressParser, Phase, ProgressEvent, ProgressParser, ProgressThrottle, parse_time_str,
};
pub use runner::{RunOutcome, RunSettings, ToolCommand, run_stoppable, run_with_progress};
