//! External sync process
//!
//! Invokes `<program> <script> <endpoint_url> <auth_token> <replica_path>`.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::timeout;

use super::{SyncOutput, SyncRequest, SyncRunner};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Sync runner that spawns a child process
pub struct ProcessSyncRunner {
    program: String,
    script: String,
    working_dir: Option<PathBuf>,
}

impl ProcessSyncRunner {
    pub fn new(program: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            program: config.program.clone(),
            script: config.script.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, request: &SyncRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .arg(&request.endpoint_url)
            .arg(&request.auth_token)
            .arg(&request.replica_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl SyncRunner for ProcessSyncRunner {
    async fn run(&self, request: SyncRequest) -> Result<SyncOutput> {
        let child = self
            .command(&request)
            .spawn()
            .map_err(|e| process_error("failed to start", &self.program, e))?;

        // Dropping the output future on timeout kills the child
        let output = match timeout(request.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| process_error("failed waiting for", &self.program, e))?,
            Err(_) => {
                return Err(Error::SyncFailed(format!(
                    "timed out after {}s",
                    request.timeout.as_secs_f64()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            tracing::debug!("Sync process exited with {}", output.status);
            return Err(Error::SyncFailed(if stderr.trim().is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        Ok(SyncOutput { stdout, stderr })
    }
}

fn process_error(action: &str, program: &str, e: std::io::Error) -> Error {
    Error::SyncFailed(format!("{} '{}': {}", action, program, e))
}
