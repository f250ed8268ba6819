//! # Participant Process — External Chat Reader Supervision
//!
//! The participant source is an external program (a chat reader script) that
//! watches the stream's chat and posts participant batches back to
//! `POST /api/chat-participants`. This module spawns it when monitoring
//! starts and terminates it when monitoring stops.
//!
//! Invocation: `<program> <script> <tracked_id> <callback_url>`. When the
//! configured script is missing on disk, the fallback script is run instead.
//!
//! The child's stdout is relayed into the log, one line at a time, at a level
//! chosen by [`classify_output`]; stderr is always logged as an error. When
//! the child exits on its own the exit is logged and it is not restarted.
//! Stopping sends SIGTERM (via `kill -TERM` on Unix), waits briefly, then
//! kills.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const STOP_GRACE: Duration = Duration::from_secs(3);

/// How to launch the participant source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSourceConfig {
    /// Interpreter or executable to run.
    pub program: String,
    /// Script path passed as the first argument. Omitted when empty.
    #[serde(default)]
    pub script: String,
    /// Run instead of `script` when `script` does not exist.
    #[serde(default)]
    pub fallback_script: String,
    /// Base URL the source posts participants and heartbeats to.
    pub callback_url: String,
}

impl Default for ParticipantSourceConfig {
    fn default() -> Self {
        ParticipantSourceConfig {
            program: "python3".to_string(),
            script: "./python/chat_fetcher_robust.py".to_string(),
            fallback_script: "./python/chat_fetcher.py".to_string(),
            callback_url: "http://localhost:3001".to_string(),
        }
    }
}

impl ParticipantSourceConfig {
    /// Script to pass to `program`, or `None` to run `program` bare.
    pub fn resolve_script(&self) -> Option<&str> {
        if self.script.is_empty() {
            return None;
        }
        if Path::new(&self.script).exists() || self.fallback_script.is_empty() {
            return Some(&self.script);
        }
        if Path::new(&self.fallback_script).exists() {
            info!(
                missing = %self.script,
                fallback = %self.fallback_script,
                "participant script not found, using fallback"
            );
            return Some(&self.fallback_script);
        }
        Some(&self.script)
    }
}

/// Log level for a line of child output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineLevel {
    Info,
    Warn,
    Error,
}

pub fn classify_output(line: &str) -> LineLevel {
    if line.contains("Error") || line.contains("Failed") {
        LineLevel::Error
    } else if line.contains("Reconnect") {
        LineLevel::Warn
    } else {
        LineLevel::Info
    }
}

/// Handle to a running participant source.
pub struct ParticipantProcess {
    tracked_id: String,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl ParticipantProcess {
    pub fn spawn(config: &ParticipantSourceConfig, tracked_id: &str) -> anyhow::Result<Self> {
        let script = config.resolve_script();
        let mut cmd = Command::new(&config.program);
        if let Some(script) = script {
            cmd.arg(script);
        }
        cmd.arg(tracked_id)
            .arg(&config.callback_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!("failed to spawn participant source '{}': {}", config.program, e)
        })?;
        info!(
            program = %config.program,
            script = script.unwrap_or(""),
            tracked_id,
            pid = child.id().unwrap_or(0),
            "participant source started"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match classify_output(line) {
                        LineLevel::Error => error!(source = "chat", "{}", line),
                        LineLevel::Warn => warn!(source = "chat", "{}", line),
                        LineLevel::Info => info!(source = "chat", "{}", line),
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    error!(source = "chat", "participant source error: {}", line);
                }
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(child, stop_rx));
        Ok(ParticipantProcess {
            tracked_id: tracked_id.to_string(),
            stop_tx: Some(stop_tx),
            supervisor,
        })
    }

    pub fn tracked_id(&self) -> &str {
        &self.tracked_id
    }

    /// Whether the child is still being supervised.
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }

    /// Terminate the child and wait for the supervisor to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.supervisor).await {
            warn!(error = %e, "participant source supervisor failed");
        }
    }
}

async fn supervise(mut child: Child, stop_rx: oneshot::Receiver<()>) {
    // A dropped handle counts as a stop request.
    let stop_requested = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(s) if s.success() => info!(code = s.code().unwrap_or(0), "participant source exited"),
                Ok(s) => warn!(code = s.code().unwrap_or(-1), "participant source exited"),
                Err(e) => error!(error = %e, "failed waiting on participant source"),
            }
            false
        }
        _ = stop_rx => true,
    };
    if !stop_requested {
        return;
    }

    send_term_signal(&mut child);
    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(_) => info!("participant source stopped"),
        Err(_) => {
            warn!("participant source ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

/// Send SIGTERM (Unix) or kill (other) to a child process.
fn send_term_signal(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_output_lines() {
        assert_eq!(classify_output("Error: chat closed"), LineLevel::Error);
        assert_eq!(classify_output("Failed to connect"), LineLevel::Error);
        assert_eq!(classify_output("Reconnecting in 5s"), LineLevel::Warn);
        assert_eq!(classify_output("New participant: ayse"), LineLevel::Info);
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let config = ParticipantSourceConfig {
            program: "/nonexistent/streamprize-test-binary".to_string(),
            script: String::new(),
            fallback_script: String::new(),
            callback_url: "http://localhost:1".to_string(),
        };
        assert!(ParticipantProcess::spawn(&config, "vid").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_long_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("reader.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();
        let config = ParticipantSourceConfig {
            program: "sh".to_string(),
            script: script.to_string_lossy().into_owned(),
            fallback_script: String::new(),
            callback_url: "http://localhost:1".to_string(),
        };
        let process = ParticipantProcess::spawn(&config, "vid").unwrap();
        assert_eq!(process.tracked_id(), "vid");
        assert!(process.is_running());
        tokio::time::timeout(Duration::from_secs(10), process.stop())
            .await
            .unwrap();
    }

    #[test]
    fn default_script_prefers_robust_reader() {
        let config = ParticipantSourceConfig::default();
        assert!(config.script.ends_with("chat_fetcher_robust.py"));
        assert!(config.fallback_script.ends_with("chat_fetcher.py"));
    }

    #[test]
    fn resolve_script_falls_back_when_primary_missing() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("reader_robust.py");
        let fallback = dir.path().join("reader.py");
        let path = |p: &std::path::Path| p.to_string_lossy().into_owned();
        let config = ParticipantSourceConfig {
            program: "python3".to_string(),
            script: path(&primary),
            fallback_script: path(&fallback),
            callback_url: "http://localhost:1".to_string(),
        };

        // Neither exists: keep the configured script so the failure names it.
        assert_eq!(config.resolve_script(), Some(path(&primary).as_str()));

        std::fs::write(&fallback, "").unwrap();
        assert_eq!(config.resolve_script(), Some(path(&fallback).as_str()));

        std::fs::write(&primary, "").unwrap();
        assert_eq!(config.resolve_script(), Some(path(&primary).as_str()));

        let bare = ParticipantSourceConfig {
            script: String::new(),
            ..config
        };
        assert_eq!(bare.resolve_script(), None);
    }
}
