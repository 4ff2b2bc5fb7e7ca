//! Session controller: owns the conversation, orchestrates turn-taking,
//! and exposes the analysis-only path polling uses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::backend::{ChatMessage, ModelBackend, PromptMode};
use crate::error::{DuckyError, Result};
use crate::parser::parse_response;
use crate::shell::ShellResult;

/// System prompt establishing the assistant's job. Sent as the first
/// context message on every backend call.
pub const SYSTEM_PROMPT: &str = "You are Ducky, a pair-programming terminal assistant. Help the user \
debug, reason about their system, and get things done in the shell. Think step by step and ask \
clarifying questions when needed. When the user pastes multi-line terminal output, respond with one \
comprehensive answer rather than reacting line by line.";

/// Appended to user prompts in command mode so the model marks the
/// executable part unambiguously.
const COMMAND_INSTRUCTION: &str = "Reply with a single shell command that accomplishes this, wrapped \
in <command></command> tags. Keep any explanation outside the tags.";

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    SystemNote,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::SystemNote => "system",
        }
    }
}

/// One exchange in the conversation. Turns are append-only; ordering is the
/// only relationship that matters.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Extracted command, present only on assistant turns that carried one.
    pub command: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            command: None,
        }
    }

    pub fn assistant(text: impl Into<String>, command: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            command,
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self {
            role: Role::SystemNote,
            text: text.into(),
            timestamp: Utc::now(),
            command: None,
        }
    }
}

/// Ordered sequence of turns for one process invocation.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn carrying a non-empty command. This lookup is
    /// the only notion of "last command" — there is no separately mutated
    /// global, so clearing history clears it too.
    pub fn last_command(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find_map(|t| t.command.as_deref().filter(|c| !c.is_empty()))
    }

    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.text.as_str())
    }

    fn messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::new("system", system_prompt))
            .chain(
                self.turns
                    .iter()
                    .map(|t| ChatMessage::new(t.role.as_str(), t.text.clone())),
            )
            .collect()
    }
}

/// What a `submit` call hands back to its caller.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The assistant text with command markup stripped, ready to print.
    pub display_text: String,
    /// The extracted command, command mode only.
    pub command: Option<String>,
}

/// Owns the conversation for one process invocation. The interactive loop
/// and the polling engine share one `Arc<Session>`; the mutex keeps their
/// interleaved appends serialized.
pub struct Session {
    backend: Arc<dyn ModelBackend>,
    conversation: Mutex<Conversation>,
    system_prompt: String,
}

impl Session {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self::with_system_prompt(backend, SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(backend: Arc<dyn ModelBackend>, system_prompt: &str) -> Self {
        Self {
            backend,
            conversation: Mutex::new(Conversation::default()),
            system_prompt: system_prompt.to_string(),
        }
    }

    /// Send a prompt with the full conversation as context and append both
    /// sides of the exchange. In command mode the reply goes through the
    /// parser; analysis mode never extracts.
    ///
    /// On backend failure the user turn stays appended, so a retry does not
    /// lose context.
    pub async fn submit(&self, text: &str, mode: PromptMode) -> Result<Reply> {
        let content = match mode {
            PromptMode::Command => format!("{}\n\n{}", text.trim(), COMMAND_INSTRUCTION),
            PromptMode::Analysis => text.trim().to_string(),
        };

        let context = {
            let mut convo = self.conversation.lock();
            convo.append(Turn::user(content));
            convo.messages(&self.system_prompt)
        };

        let raw = self.backend.complete(&context, mode).await?;

        let (display_text, command) = match mode {
            PromptMode::Command => {
                let parsed = parse_response(&raw);
                (parsed.display_text, parsed.command.map(|c| c.command))
            }
            PromptMode::Analysis => (raw.clone(), None),
        };

        self.conversation
            .lock()
            .append(Turn::assistant(raw, command.clone()));

        Ok(Reply {
            display_text,
            command,
        })
    }

    /// The most recently suggested command, without contacting the backend.
    pub fn rerun_last(&self) -> Result<String> {
        self.conversation
            .lock()
            .last_command()
            .map(ToOwned::to_owned)
            .ok_or(DuckyError::NoCommandAvailable)
    }

    /// Clear the conversation. Callers must not reset while a submit is
    /// outstanding from the same logical session; the single-threaded
    /// interactive path guarantees this by construction.
    pub fn reset(&self) {
        self.conversation.lock().clear();
    }

    /// Record a direct shell execution so a follow-up prompt can refer to
    /// its output.
    pub fn record_shell(&self, result: &ShellResult) {
        let mut convo = self.conversation.lock();
        convo.append(Turn::user(format!("!{}", result.command)));
        convo.append(Turn::assistant(result.summary(), None));
    }

    /// Append a system note (poll lifecycle, mode switches) visible to the
    /// model as context.
    pub fn record_note(&self, text: impl Into<String>) {
        self.conversation.lock().append(Turn::note(text));
    }

    pub fn last_assistant_text(&self) -> Option<String> {
        self.conversation
            .lock()
            .last_assistant_text()
            .map(ToOwned::to_owned)
    }

    pub fn turn_count(&self) -> usize {
        self.conversation.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Conversation, Session, Turn};
    use crate::backend::{testing::CannedBackend, PromptMode};
    use crate::error::DuckyError;
    use crate::shell::ShellResult;

    #[tokio::test]
    async fn command_mode_extracts_and_stores_command() {
        let backend = Arc::new(CannedBackend::replying(&[
            "Run this:\n<command>df -h</command>\nShows disk usage.",
        ]));
        let session = Session::new(backend);

        let reply = session.submit("disk usage", PromptMode::Command).await.unwrap();
        assert_eq!(reply.command.as_deref(), Some("df -h"));
        assert!(!reply.display_text.contains("<command>"));
        assert_eq!(session.rerun_last().unwrap(), "df -h");
        // user turn + assistant turn
        assert_eq!(session.turn_count(), 2);
    }

    #[tokio::test]
    async fn analysis_mode_never_extracts() {
        let backend = Arc::new(CannedBackend::replying(&[
            "Looks fine. You could run <command>reboot</command> though.",
        ]));
        let session = Session::new(backend);

        let reply = session
            .submit("analyze this", PromptMode::Analysis)
            .await
            .unwrap();
        assert_eq!(reply.command, None);
        // Analysis replies pass through untouched.
        assert!(reply.display_text.contains("<command>reboot</command>"));
        assert!(session.rerun_last().is_err());
    }

    #[tokio::test]
    async fn backend_failure_keeps_user_turn_for_retry() {
        let backend = Arc::new(CannedBackend::failing());
        let session = Session::new(backend);

        let err = session
            .submit("hello", PromptMode::Command)
            .await
            .unwrap_err();
        assert!(err.is_backend_failure());
        assert_eq!(session.turn_count(), 1);
    }

    #[tokio::test]
    async fn rerun_last_without_command_is_typed_failure() {
        let backend = Arc::new(CannedBackend::replying(&["just words, no command"]));
        let session = Session::new(backend);
        session
            .submit("chat", PromptMode::Command)
            .await
            .unwrap();

        assert!(matches!(
            session.rerun_last(),
            Err(DuckyError::NoCommandAvailable)
        ));
    }

    #[tokio::test]
    async fn rerun_last_finds_most_recent_command_across_turns() {
        let backend = Arc::new(CannedBackend::replying(&[
            "<command>ls</command>",
            "no command here",
        ]));
        let session = Session::new(backend);
        session.submit("one", PromptMode::Command).await.unwrap();
        session.submit("two", PromptMode::Command).await.unwrap();

        // The second reply had no command; the lookup falls back to the
        // first one.
        assert_eq!(session.rerun_last().unwrap(), "ls");
    }

    #[tokio::test]
    async fn reset_clears_history_and_last_command() {
        let backend = Arc::new(CannedBackend::replying(&["<command>uptime</command>"]));
        let session = Session::new(backend);
        session.submit("load", PromptMode::Command).await.unwrap();

        session.reset();
        assert_eq!(session.turn_count(), 0);
        assert!(matches!(
            session.rerun_last(),
            Err(DuckyError::NoCommandAvailable)
        ));
    }

    #[test]
    fn record_shell_appends_both_sides() {
        let backend = Arc::new(CannedBackend::replying(&[]));
        let session = Session::new(backend);
        session.record_shell(&ShellResult {
            command: "git status".into(),
            stdout: "clean\n".into(),
            stderr: String::new(),
            exit_code: 0,
        });

        assert_eq!(session.turn_count(), 2);
        assert_eq!(session.last_assistant_text().unwrap(), "clean");
    }

    #[test]
    fn conversation_last_command_skips_empty() {
        let mut convo = Conversation::default();
        convo.append(Turn::assistant("a", Some("ls".into())));
        convo.append(Turn::assistant("b", Some(String::new())));
        convo.append(Turn::assistant("c", None));
        assert_eq!(convo.last_command(), Some("ls"));
    }
}
