pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod paths;
pub mod process;
pub mod queue;
pub mod sidecar_api;
pub mod strategy;
pub mod worker;

pub use config::EngineConfig;
pub use controller::TaskController;
pub use job::{JobEvent, JobId, JobKind, JobObserver, JobOutcome, JobParams, JobSpec, JobStatus};
pub use queue::JobDispatcher;
pub use worker::JobExecutor;
