//! Runs a validated backing command and relays its stdio.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tonic::Status;
use tracing::{debug, info, warn};

use gitgrpc_core::{Relay, RelayError};

use crate::validate::ValidatedRequest;

/// Errors running a backing command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: io::Error,
    },

    #[error("{service} did not provide piped stdio")]
    MissingStdio { service: String },

    #[error("failed to wait for {service}: {source}")]
    Wait {
        service: String,
        #[source]
        source: io::Error,
    },

    /// Non-zero exit. `stderr` holds the command's diagnostic output, or the
    /// exit status when it printed nothing.
    #[error("{service} failed: {stderr}")]
    Failed {
        service: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<ExecError> for Status {
    fn from(err: ExecError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Spawns allow-listed commands with the repository as their only argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessExecutor {
    relay: Relay,
}

impl SubprocessExecutor {
    pub const fn new(relay: Relay) -> Self {
        Self { relay }
    }

    /// Run `request` with `input` feeding its stdin and its stdout going to
    /// `output`, until the command exits and its stdout is drained.
    ///
    /// Once the command has exited the session no longer waits for `input`
    /// to end. A non-zero exit wins over any relay error. A broken pipe on the
    /// command's stdin is ignored when the command exits successfully. If the
    /// relay fails for any other reason the command is killed.
    pub async fn run<R, W>(
        &self,
        request: &ValidatedRequest,
        input: R,
        output: W,
    ) -> Result<(), ExecError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let service = &request.service;
        let mut child = Command::new(&request.program)
            .arg(&request.repository_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                service: service.clone(),
                source,
            })?;

        let pid = child.id();
        debug!(%service, ?pid, program = %request.program.display(), "Spawned backing command");

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ExecError::MissingStdio {
                service: service.clone(),
            });
        };

        // Drained concurrently so a chatty command never blocks on stderr.
        let stderr_task = AbortOnDropHandle::new(tokio::spawn(read_stderr(stderr)));

        let exited = CancellationToken::new();
        let relay = self.relay.run_until(
            input,
            output,
            stdout,
            stdin,
            exited.clone().cancelled_owned(),
        );
        tokio::pin!(relay);

        let mut killed = false;
        let (relay_result, wait_result) = tokio::select! {
            result = &mut relay => {
                if let Err(e) = &result
                    && !is_closed_stdin(e)
                {
                    warn!(%service, ?pid, error = %e, "Relay failed, killing backing command");
                    if let Err(kill_err) = child.start_kill() {
                        debug!(%service, error = %kill_err, "Backing command already gone");
                    }
                    killed = true;
                }
                (result, child.wait().await)
            }
            wait_result = child.wait() => {
                debug!(%service, ?pid, "Backing command exited, draining its output");
                exited.cancel();
                (relay.await, wait_result)
            }
        };

        let status = wait_result.map_err(|source| ExecError::Wait {
            service: service.clone(),
            source,
        })?;
        let stderr = match stderr_task.await {
            Ok(stderr) => stderr,
            Err(e) => {
                debug!(%service, error = %e, "stderr reader did not finish");
                Vec::new()
            }
        };

        if !status.success() && !killed {
            let stderr = if stderr.is_empty() {
                status.to_string()
            } else {
                String::from_utf8_lossy(&stderr).into_owned()
            };
            info!(%service, ?pid, %status, "Backing command failed");
            return Err(ExecError::Failed {
                service: service.clone(),
                status,
                stderr,
            });
        }

        match relay_result {
            Ok(stats) => {
                info!(
                    %service,
                    ?pid,
                    uploaded = stats.uploaded,
                    downloaded = stats.downloaded,
                    "Backing command finished"
                );
                Ok(())
            }
            Err(e) if is_closed_stdin(&e) => {
                debug!(%service, ?pid, "Backing command exited before reading all input");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_closed_stdin(err: &RelayError) -> bool {
    matches!(err, RelayError::UploadWrite(e) if e.kind() == io::ErrorKind::BrokenPipe)
}

async fn read_stderr(mut stderr: ChildStderr) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        debug!(error = %e, "stderr read ended early");
    }
    buf
}
