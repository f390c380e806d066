//! Local-process (STDIO) upstream sessions.
//!
//! - Uses raw `tokio::process::Command` instead of `TokioChildProcess` so that
//!   noisy servers that print banners or logs on stdout still work: non-JSON
//!   lines are discarded before they reach the rmcp transport.
//! - Stderr is drained into debug logs so the pipe never fills up.
//! - The child is spawned with `kill_on_drop`, so a session dropped mid-call
//!   (caller cancelled) does not leak the process.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rmcp::service::RunningService;
use rmcp::{RoleClient, ServiceExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::resolve_env_vars;
use crate::error::SwitchyardError;

/// Borrowed launch parameters of a local-process server.
#[derive(Debug)]
pub struct Launch<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub env: &'a HashMap<String, String>,
    pub cwd: Option<&'a Path>,
}

/// Spawn the child process for a STDIO MCP server with all pipes attached.
fn spawn_stdio_child(server: &str, launch: &Launch<'_>) -> crate::Result<Child> {
    let mut cmd = Command::new(launch.command);

    if !launch.args.is_empty() {
        cmd.args(launch.args);
    }

    if !launch.env.is_empty() {
        cmd.envs(resolve_env_vars(launch.env));
    }

    if let Some(cwd) = launch.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    cmd.spawn()
        .map_err(|e| SwitchyardError::UpstreamUnreachable(server.to_string(), e.to_string()))
}

/// Start a background task that filters stdout from the child process.
///
/// Non-JSON lines are discarded with a debug log. Valid JSON lines are
/// forwarded to the returned reader, which rmcp uses as its transport input.
fn start_stdout_filter(
    child_stdout: tokio::process::ChildStdout,
    server: String,
    cancel: CancellationToken,
) -> tokio::io::ReadHalf<tokio::io::DuplexStream> {
    let (client_side, server_side) = tokio::io::duplex(65536);
    let (reader, _client_writer) = tokio::io::split(client_side);
    let (_server_reader, mut writer) = tokio::io::split(server_side);

    tokio::spawn(async move {
        let mut lines = BufReader::new(child_stdout).lines();
        loop {
            tokio::select! {
                line_result = lines.next_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            if is_json_line(&line) {
                                let with_newline = format!("{}\n", line);
                                if writer.write_all(with_newline.as_bytes()).await.is_err() {
                                    break;
                                }
                            } else {
                                tracing::debug!(
                                    server = %server,
                                    line = %line,
                                    "discarding non-JSON stdout line"
                                );
                            }
                        }
                        // EOF or read error: dropping the writer signals EOF to rmcp
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    reader
}

fn is_json_line(line: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(line).is_ok()
}

/// Drain stderr from the child process into debug logs.
fn start_stderr_drain(
    child_stderr: tokio::process::ChildStderr,
    server: String,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(child_stderr).lines();
        loop {
            tokio::select! {
                line_result = lines.next_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            tracing::debug!(server = %server, line = %line, "server stderr");
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

/// Spawn the child process, start the IO filter tasks and perform the MCP
/// handshake.
///
/// The returned `Child` must be kept alive for as long as the session is used.
pub async fn spawn_and_handshake(
    server: &str,
    launch: &Launch<'_>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> crate::Result<(RunningService<RoleClient, ()>, Child)> {
    let mut child = spawn_stdio_child(server, launch)?;

    let pipe_error = |pipe: &str| {
        SwitchyardError::UpstreamUnreachable(server.to_string(), format!("failed to open {pipe} pipe"))
    };
    let child_stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
    let child_stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
    let child_stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;

    let filtered_reader = start_stdout_filter(child_stdout, server.to_string(), cancel.clone());
    start_stderr_drain(child_stderr, server.to_string(), cancel.clone());

    // rmcp reads JSON from the filtered reader and writes JSON to the child's stdin.
    let transport = (filtered_reader, child_stdin);

    let handshake_result =
        tokio::time::timeout(handshake_timeout, ().serve_with_ct(transport, cancel)).await;

    match handshake_result {
        Err(_elapsed) => Err(SwitchyardError::UpstreamUnreachable(
            server.to_string(),
            format!(
                "MCP handshake timed out after {}s",
                handshake_timeout.as_secs()
            ),
        )),
        Ok(Err(e)) => Err(SwitchyardError::UpstreamUnreachable(
            server.to_string(),
            e.to_string(),
        )),
        Ok(Ok(running)) => {
            tracing::debug!(server = %server, command = %launch.command, "STDIO MCP handshake complete");
            Ok((running, child))
        }
    }
}
