//! Subprocess transport: newline-delimited JSON over the child's stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Transport, INBOUND_CAPACITY};
use crate::error::TransportError;

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Subprocess transport speaking newline-delimited JSON over stdin/stdout.
pub struct StdioTransport {
    /// Program to spawn
    command: String,
    /// Arguments passed to the program
    args: Vec<String>,
    /// Extra environment for the child
    env: HashMap<String, String>,
    /// The running child process
    child: Option<Child>,
    /// Write half; dropped to signal EOF
    stdin: Option<ChildStdin>,
    /// Frames read from stdout by the reader task
    inbound: Option<mpsc::Receiver<Result<String, TransportError>>>,
    /// Task reading stdout line by line
    reader: Option<JoinHandle<()>>,
    /// Whether the process is believed alive
    connected: bool,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            child: None,
            stdin: None,
            inbound: None,
            reader: None,
            connected: false,
        }
    }

    /// Process id of the running child.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn terminate(child: &mut Child) {
        let Some(pid) = child.id() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(pid = pid, "Sending SIGTERM to server process");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

            tokio::select! {
                _ = child.wait() => {
                    debug!(pid = pid, "Server process exited");
                    return;
                }
                _ = tokio::time::sleep(TERMINATE_GRACE) => {
                    warn!(pid = pid, "Server process ignored SIGTERM, killing");
                }
            }
        }

        #[cfg(not(unix))]
        debug!(pid = pid, "Killing server process");

        let _ = child.kill().await;
    }
}

/// Forward complete JSON lines from the child until it closes stdout.
async fn read_frames(stdout: ChildStdout, tx: mpsc::Sender<Result<String, TransportError>>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if serde_json::from_str::<serde_json::Value>(line).is_err() {
                    warn!(frame = line, "Dropping malformed frame from server");
                    continue;
                }
                debug!(frame = line, "Received frame");
                if tx.send(Ok(line.to_string())).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(TransportError::ReadError(e.to_string()))).await;
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }

        debug!(command = %self.command, args = ?self.args, "Spawning server process");

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.reader = Some(tokio::spawn(read_frames(stdout, tx)));
        self.inbound = Some(rx);
        self.stdin = Some(stdin);
        self.child = Some(child);
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let stdin = match self.stdin.as_mut() {
            Some(stdin) if self.connected => stdin,
            _ => return Err(TransportError::WriteError("transport is closed".into())),
        };

        debug!(frame = frame, "Sending frame");

        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame.as_bytes());
        line.push(b'\n');

        let result = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        result.map_err(|e| {
            self.connected = false;
            TransportError::WriteError(e.to_string())
        })
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(None);
        };
        match inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                self.connected = false;
                Err(e)
            }
            None => {
                self.connected = false;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        // Closing stdin is the polite signal for most servers.
        self.stdin.take();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound.take();
        if let Some(mut child) = self.child.take() {
            Self::terminate(&mut child).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop takes care of the child itself
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
