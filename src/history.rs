//! Conversation log: append-only JSON lines under the state directory.
//! Logging is best effort; a failed write never interrupts the session.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::shell::ShellResult;

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

impl<'a> LogEntry<'a> {
    fn new(role: &'a str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            role,
            content: None,
            suggested_command: None,
            command: None,
            stdout: None,
            stderr: None,
            exit_code: None,
        }
    }
}

/// Appender over `conversation.log`. Holds the file handle for the life of
/// the process.
pub struct ConversationLog {
    file: Option<File>,
}

impl ConversationLog {
    /// Open (or create) the log inside the state directory. An unopenable
    /// log degrades to a no-op logger with a warning.
    pub fn open(state_dir: &Path) -> Self {
        let path = state_dir.join("conversation.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                tracing::warn!(
                    target = "ducky::history",
                    path = %path.display(),
                    error = %e,
                    "conversation log disabled"
                );
            })
            .ok();
        Self { file }
    }

    /// A logger that records nothing, for piped one-shot runs.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn log_user(&mut self, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        let mut entry = LogEntry::new("user");
        entry.content = Some(content);
        self.append(&entry);
    }

    pub fn log_assistant(&mut self, content: &str, command: Option<&str>) {
        let mut entry = LogEntry::new("assistant");
        entry.content = Some(content);
        entry.suggested_command = command;
        self.append(&entry);
    }

    pub fn log_shell(&mut self, result: &ShellResult) {
        let mut entry = LogEntry::new("shell");
        entry.command = Some(&result.command);
        entry.stdout = Some(&result.stdout);
        entry.stderr = Some(&result.stderr);
        entry.exit_code = Some(result.exit_code);
        self.append(&entry);
    }

    fn append(&mut self, entry: &LogEntry<'_>) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Ok(line) = serde_json::to_string(entry) {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::ConversationLog;
    use crate::shell::ShellResult;

    fn read_lines(dir: &TempDir) -> Vec<serde_json::Value> {
        let raw = std::fs::read_to_string(dir.path().join("conversation.log")).unwrap();
        raw.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn entries_append_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = ConversationLog::open(dir.path());

        log.log_user("how do I list files");
        log.log_assistant("Use this:\nls -la", Some("ls -la"));

        let lines = read_lines(&dir);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["role"], "user");
        assert_eq!(lines[1]["suggested_command"], "ls -la");
        assert!(lines[0]["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn blank_user_input_is_not_logged() {
        let dir = TempDir::new().unwrap();
        let mut log = ConversationLog::open(dir.path());
        log.log_user("   ");
        assert!(!dir.path().join("conversation.log").exists() || read_lines(&dir).is_empty());
    }

    #[test]
    fn shell_entries_carry_streams_and_exit() {
        let dir = TempDir::new().unwrap();
        let mut log = ConversationLog::open(dir.path());
        log.log_shell(&ShellResult {
            command: "false".into(),
            stdout: String::new(),
            stderr: "bad\n".into(),
            exit_code: 1,
        });

        let lines = read_lines(&dir);
        assert_eq!(lines[0]["role"], "shell");
        assert_eq!(lines[0]["command"], "false");
        assert_eq!(lines[0]["exit_code"], 1);
        // No assistant fields leak into shell entries.
        assert!(lines[0].get("suggested_command").is_none());
    }

    #[test]
    fn assistant_without_command_omits_the_field() {
        let dir = TempDir::new().unwrap();
        let mut log = ConversationLog::open(dir.path());
        log.log_assistant("just chatting", None);

        let lines = read_lines(&dir);
        assert!(lines[0].get("suggested_command").is_none());
    }

    #[test]
    fn disabled_logger_is_a_no_op() {
        let mut log = ConversationLog::disabled();
        log.log_user("anything");
    }
}
