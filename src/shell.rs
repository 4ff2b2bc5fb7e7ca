//! Shell executor collaborator: one-shot subshell runs for interactive
//! execution and interval polling, plus a streamed long-lived child for
//! continuous polling.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[cfg(unix)]
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::error::{DuckyError, Result};

/// Captured result of one subshell run.
#[derive(Debug, Clone)]
pub struct ShellResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellResult {
    pub fn has_output(&self) -> bool {
        !self.stdout.trim().is_empty() || !self.stderr.trim().is_empty()
    }

    /// Combined view of the run, as appended to the conversation so the
    /// model can be asked about it afterwards.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.stdout.trim().is_empty() {
            parts.push(self.stdout.trim_end().to_string());
        }
        if !self.stderr.trim().is_empty() {
            parts.push(format!("[stderr]\n{}", self.stderr.trim_end()));
        }
        if self.exit_code != 0 {
            parts.push(format!("(exit status {})", self.exit_code));
        }
        if parts.is_empty() {
            parts.push("(command produced no output)".to_string());
        }
        parts.join("\n\n")
    }
}

/// Run a command in a subshell to completion, capturing stdout, stderr, and
/// the exit status. A nonzero exit is not an error here; failure means the
/// subshell could not be started at all.
pub async fn run(command: &str) -> Result<ShellResult> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            DuckyError::ScriptExecutionFailed(format!("failed to spawn '{command}': {e}"))
        })?;

    Ok(ShellResult {
        command: command.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Whether the child's stdout stream is still producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    Closed,
}

/// A long-lived subshell whose stdout is read line-by-line on a background
/// task. The poll loop drains accumulated output at each tick boundary.
#[derive(Debug)]
pub struct StreamingChild {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
}

/// Launch a command as a streaming child. The reader task ends at stdout
/// EOF, which `drain` reports as `Closed` once the buffer empties.
pub fn spawn_stream(command: &str) -> Result<StreamingChild> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            DuckyError::ScriptExecutionFailed(format!("failed to spawn '{command}': {e}"))
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        DuckyError::ScriptExecutionFailed("spawned child has no stdout".to_string())
    })?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    Ok(StreamingChild { child, lines: rx })
}

impl StreamingChild {
    /// Pull everything accumulated since the last call, without blocking.
    pub fn drain(&mut self) -> (String, StreamStatus) {
        let mut buf = String::new();
        let status = loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                Err(mpsc::error::TryRecvError::Empty) => break StreamStatus::Open,
                Err(mpsc::error::TryRecvError::Disconnected) => break StreamStatus::Closed,
            }
        };
        (buf, status)
    }

    /// Exit code, if the child has already exited.
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Request termination and wait for the child to be reaped. Does not
    /// return with the child still running.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        terminate_child(&mut self.child, grace).await
    }
}

/// SIGTERM first, then SIGKILL after the grace period elapses.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }

    if timeout(grace, child.wait()).await.is_err() {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.kill().await;
        }

        let _ = child.wait().await;
    }

    Ok(())
}
