//! CLI flags and persisted settings. The settings file remembers the last
//! model and host so the next invocation picks up where the user left off.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_LOCAL_HOST;

pub const DEFAULT_MODEL: &str = "glm-4.7:cloud";
pub const DEFAULT_HOST: &str = "https://ollama.com";
pub const DEFAULT_LOCAL_MODEL: &str = "qwen3";

#[derive(Debug, Parser, Clone)]
#[command(name = "ducky")]
#[command(version)]
#[command(about = "A rubber-duck terminal assistant that suggests and runs shell commands")]
pub struct Cli {
    /// Model to use; defaults to the last used one.
    #[arg(long, short)]
    pub model: Option<String>,

    /// Ollama-compatible host URL; defaults to the last used one.
    #[arg(long)]
    pub host: Option<String>,

    /// Use a local Ollama instance on localhost:11434.
    #[arg(long, short, default_value_t = false)]
    pub local: bool,

    /// Run suggested commands without asking for confirmation.
    #[arg(long, short, default_value_t = false)]
    pub yolo: bool,

    /// Read the files in this directory into the prompt context.
    #[arg(long, short)]
    pub directory: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Prompt to run once; interactive mode starts when omitted.
    #[arg(trailing_var_arg = true)]
    pub prompt: Vec<String>,
}

/// What survives between invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub last_model: String,
    pub last_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_model: DEFAULT_MODEL.to_string(),
            last_host: DEFAULT_HOST.to_string(),
        }
    }
}

impl Settings {
    /// Load from `config.json` in the state dir. Missing or corrupt files
    /// read as defaults.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join("config.json");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(
                target = "ducky::config",
                path = %path.display(),
                error = %e,
                "settings unreadable, using defaults"
            );
            Self::default()
        })
    }

    /// Persist, best effort. A failed write only warns.
    pub fn save(&self, state_dir: &Path) {
        let path = state_dir.join("config.json");
        let write = std::fs::create_dir_all(state_dir).and_then(|_| {
            let raw = serde_json::to_string_pretty(self).unwrap_or_default();
            std::fs::write(&path, raw)
        });
        if let Err(e) = write {
            tracing::warn!(
                target = "ducky::config",
                path = %path.display(),
                error = %e,
                "could not save settings"
            );
        }
    }
}

/// Model and host after folding flags over persisted settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub model: String,
    pub host: String,
}

impl Cli {
    /// Resolve which model and host to talk to. `--local` wins, then
    /// explicit flags, then the remembered settings.
    pub fn connection(&self, settings: &Settings) -> Connection {
        if self.local {
            return Connection {
                model: self
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
                host: DEFAULT_LOCAL_HOST.to_string(),
            };
        }
        Connection {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| settings.last_model.clone()),
            host: self
                .host
                .clone()
                .unwrap_or_else(|| settings.last_host.clone()),
        }
    }

    pub fn single_prompt(&self) -> Option<String> {
        if self.prompt.is_empty() {
            None
        } else {
            Some(self.prompt.join(" "))
        }
    }
}

/// `~/.ducky`, shared by settings, crumbs, and the conversation log.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ducky")
}
