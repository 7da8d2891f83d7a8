use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use vidqueue_core::error::AppError;
use vidqueue_core::ffmpeg::ErrorPayload;
use vidqueue_core::sidecar_api::{Engine, JobEventEmitter};
use vidqueue_core::{EngineConfig, JobEvent, JobId, JobSpec};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: ErrorPayload,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobIdParams {
    job_id: JobId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbeParams {
    path: PathBuf,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn emit_job_event(writer: &SharedWriter, event: JobEvent) {
    match event {
        JobEvent::Progress { job_id, event } => {
            let mut payload = serde_json::to_value(&event).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut payload {
                map.insert("jobId".to_string(), json!(job_id));
            }
            emit_rpc_event(writer, "job.progress", payload);
        }
        JobEvent::Finished(outcome) => {
            let payload = serde_json::to_value(&outcome).unwrap_or(Value::Null);
            emit_rpc_event(writer, "job.complete", payload);
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_input(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize result: {}", e)))
}

fn dispatch(
    method: &str,
    params: Value,
    engine: &Engine,
    writer: &SharedWriter,
) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_result_value(&engine.capabilities()),
        "media.probe" => {
            let parsed: ProbeParams = params_from_value(params)?;
            to_result_value(&engine.probe(&parsed.path)?)
        }
        "job.submit" => {
            let spec: JobSpec = params_from_value(params)?;
            let event_writer = Arc::clone(writer);
            let emit: JobEventEmitter = Arc::new(move |event| emit_job_event(&event_writer, event));
            let job_id = engine.submit(spec, emit)?;
            Ok(json!({ "jobId": job_id }))
        }
        "job.pause" => {
            let parsed: JobIdParams = params_from_value(params)?;
            engine.pause(parsed.job_id)?;
            Ok(json!({ "ok": true }))
        }
        "job.resume" => {
            let parsed: JobIdParams = params_from_value(params)?;
            engine.resume(parsed.job_id)?;
            Ok(json!({ "ok": true }))
        }
        "job.stop" => {
            let parsed: JobIdParams = params_from_value(params)?;
            engine.stop(parsed.job_id)?;
            Ok(json!({ "ok": true }))
        }
        "job.list" => to_result_value(&engine.list()),
        _ => Err(AppError::invalid_input(format!("Unknown method: {}", method))),
    }
}

fn handle_request(request: RpcRequest, engine: &Engine, writer: &SharedWriter) {
    let response = match dispatch(&request.method, request.params, engine, writer) {
        Ok(result) => serde_json::to_value(RpcSuccess {
            id: request.id,
            result,
        })
        .map_err(|e| io::Error::other(format!("serialize success: {}", e))),
        Err(err) => {
            log::debug!(
                target: "vidqueue::sidecar",
                "{} failed: {}",
                request.method,
                err
            );
            let payload = err.payload();
            serde_json::to_value(RpcFailure {
                id: request.id,
                error: payload,
            })
            .map_err(|e| io::Error::other(format!("serialize failure: {}", e)))
        }
    };

    match response {
        Ok(value) => {
            let _ = write_json_line_shared(writer, &value);
        }
        Err(err) => {
            let failure = RpcFailure {
                id: request.id,
                error: ErrorPayload {
                    summary: "Serialization error".to_string(),
                    detail: err.to_string(),
                },
            };
            let _ = write_json_line_shared(writer, &failure);
        }
    }
}

fn main() -> io::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let engine = Engine::new(EngineConfig::from_env())
        .map_err(|e| io::Error::other(format!("start job engine: {}", e)))?;
    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: ErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: ErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        handle_request(request, &engine, &stdout);
    }

    log::info!(target: "vidqueue::sidecar", "stdin closed, shutting down");
    engine.shutdown();
    Ok(())
}
