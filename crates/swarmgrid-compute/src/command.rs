//! Compute backend that shells out to an external process.
//!
//! The process is invoked as `<command> --model <key>` and receives
//! `{"params": {...}, "inputs": ["<hex>", ...]}` on stdin. It writes the
//! result bytes to stdout and exits 0; anything else is a failure, with
//! stderr as the message. The process is killed when the job is cancelled.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use swarm_core::DiffuseParams;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{ComputeError, ComputeResult};
use crate::executor::ComputeBackend;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct Request<'a> {
    params: &'a DiffuseParams,
    inputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: PathBuf,
}

/// The command has no model state of its own; the handle records the key.
#[derive(Debug, Clone)]
pub struct CommandModel {
    pub model_key: String,
}

impl CommandBackend {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

impl ComputeBackend for CommandBackend {
    type Model = CommandModel;

    fn load(&self, model_key: &str) -> ComputeResult<CommandModel> {
        if model_key.is_empty() {
            return Err(ComputeError::UnknownModel(model_key.to_string()));
        }
        info!(model = %model_key, command = ?self.command, "model bound to command");
        Ok(CommandModel {
            model_key: model_key.to_string(),
        })
    }

    fn compute(
        &self,
        model: &CommandModel,
        params: &DiffuseParams,
        inputs: &[Bytes],
        cancel: &CancelToken,
    ) -> ComputeResult<Bytes> {
        let request = Request {
            params,
            inputs: inputs.iter().map(hex::encode).collect(),
        };
        let body = serde_json::to_vec(&request).map_err(|e| ComputeError::Failed(e.to_string()))?;

        let mut child = Command::new(&self.command)
            .arg("--model")
            .arg(&model.model_key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        debug!(pid = child.id(), "compute process started");

        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // A process that exits without reading stdin is not our error.
                let _ = stdin.write_all(&body);
            }
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if cancel.is_cancelled() {
                kill(&mut child);
                let _ = writer.join();
                return Err(ComputeError::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };
        let _ = writer.join();

        let stdout = stdout
            .join()
            .map_err(|_| ComputeError::Failed("stdout reader panicked".to_string()))?;
        let stderr = stderr
            .join()
            .map_err(|_| ComputeError::Failed("stderr reader panicked".to_string()))?;

        if !status.success() {
            let message = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(ComputeError::Failed(if message.is_empty() {
                format!("compute process exited with {status}")
            } else {
                message
            }));
        }
        Ok(Bytes::from(stdout))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill compute process");
    }
    let _ = child.wait();
    info!("compute process killed on cancel");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("compute.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn stdout_is_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CommandBackend::new(script(dir.path(), "cat > /dev/null\nprintf \"$2\""));
        let model = backend.load("sd-1.5").unwrap();
        let out = backend
            .compute(&model, &DiffuseParams::new("sd-1.5", "x"), &[], &CancelToken::new())
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"sd-1.5"));
    }

    #[test]
    fn stderr_becomes_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CommandBackend::new(script(dir.path(), "echo 'out of memory' >&2\nexit 3"));
        let model = backend.load("sd-1.5").unwrap();
        let err = backend
            .compute(&model, &DiffuseParams::new("sd-1.5", "x"), &[], &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ComputeError::Failed(msg) if msg == "out of memory"));
    }

    #[test]
    fn cancel_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CommandBackend::new(script(dir.path(), "sleep 30"));
        let model = backend.load("sd-1.5").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let err = backend
            .compute(&model, &DiffuseParams::new("sd-1.5", "x"), &[], &cancel)
            .unwrap_err();
        assert!(matches!(err, ComputeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
