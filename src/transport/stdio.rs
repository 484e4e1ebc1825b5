//! Stdio transport implementation (subprocess)

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

use super::{MessageStream, Transport};
use crate::{Error, Result};

/// How long `close` waits for the process to exit before killing it
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Stdio transport for subprocess MCP servers
pub struct StdioTransport {
    /// Command line, for logs
    command: String,
    /// Child process
    child: Mutex<Option<Child>>,
    /// Writer handle, shared with in-flight write tasks
    writer: Arc<Mutex<Option<ChildStdin>>>,
    /// Reader handle, until `receive` takes it
    reader: parking_lot::Mutex<Option<ChildStdout>>,
}

impl StdioTransport {
    /// Spawn the MCP server process
    ///
    /// `command` is split like a shell would split it; `args` are appended.
    /// The child's stderr is forwarded line by line to our stderr.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        let mut parts = shlex::split(command)
            .ok_or_else(|| Error::Config(format!("Unbalanced quoting in command: {command}")))?;
        if parts.is_empty() {
            return Err(Error::Config("Empty command".to_string()));
        }
        let program = parts.remove(0);

        let mut cmd = Command::new(&program);
        cmd.args(&parts)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Unreachable(format!("Failed to spawn `{program}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Transport("Failed to get stderr".to_string()))?;

        tokio::spawn(forward_stderr(stderr));

        info!(command = %command, pid = ?child.id(), "Spawned MCP server process");

        Ok(Arc::new(Self {
            command: command.to_string(),
            child: Mutex::new(Some(child)),
            writer: Arc::new(Mutex::new(Some(stdin))),
            reader: parking_lot::Mutex::new(Some(stdout)),
        }))
    }
}

/// Copy the child's diagnostic stream to ours without interpreting it
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => eprintln!("[MCP Server] {line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped forwarding MCP server stderr");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let mut line = frame.into_bytes();
        line.push(b'\n');

        // Frames are written whole even if the caller is dropped mid-write.
        let writer = Arc::clone(&self.writer);
        let write = tokio::spawn(async move {
            let mut writer = writer.lock().await;
            let Some(stdin) = writer.as_mut() else {
                return Err(Error::TransportClosed("stdin is closed".to_string()));
            };

            let written = match stdin.write_all(&line).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };

            written.map_err(|e| match e.kind() {
                std::io::ErrorKind::BrokenPipe => {
                    Error::TransportClosed(format!("MCP server process stopped reading: {e}"))
                }
                _ => Error::Transport(e.to_string()),
            })
        });

        write
            .await
            .map_err(|e| Error::Internal(format!("stdin write task failed: {e}")))?
    }

    fn receive(&self) -> Result<MessageStream> {
        let stdout = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("stdout already taken".to_string()))?;

        // Split on raw bytes so one undecodable line cannot end the stream.
        let stream = SplitStream::new(BufReader::new(stdout).split(b'\n')).map(|item| {
            item.map(|bytes| {
                let mut line = String::from_utf8_lossy(&bytes).into_owned();
                if line.ends_with('\r') {
                    line.pop();
                }
                line
            })
            .map_err(|e| Error::TransportClosed(format!("stdout read failed: {e}")))
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the handles closes our ends of both pipes. A write stuck
        // on a full pipe keeps stdin; the kill below unblocks it.
        match tokio::time::timeout(EXIT_GRACE, self.writer.lock()).await {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => warn!(command = %self.command, "Pending stdin write did not finish"),
        }
        self.reader.lock().take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    debug!(command = %self.command, "MCP server process exited");
                }
                Ok(Ok(status)) => {
                    warn!(command = %self.command, %status, "MCP server process exited with failure status");
                }
                Ok(Err(e)) => {
                    warn!(command = %self.command, error = %e, "Failed to wait for MCP server process");
                }
                Err(_) => {
                    warn!(command = %self.command, "MCP server process did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill MCP server process");
                    }
                }
            }
        }

        Ok(())
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}
