//! Crumb registry: named command shortcuts persisted as a JSON map under
//! the state directory, with `${VAR}` / `$var` placeholder substitution at
//! invocation time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{DuckyError, Result};
use crate::poll::{PollMode, DEFAULT_ANALYSIS_PROMPT, DEFAULT_INTERVAL_SECS};

/// Poll settings stored on a crumb. Command-line flags override these at
/// `/poll` time; anything unset falls back to engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PollDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// One saved shortcut.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Crumb {
    pub command: String,
    /// The prompt that originally produced the command, if any.
    #[serde(default)]
    pub prompt: String,
    /// The full assistant response the command came from.
    #[serde(default)]
    pub response: String,
    /// Generated description, filled in asynchronously after save.
    #[serde(default)]
    pub explanation: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollDefaults>,
}

impl Crumb {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            prompt: String::new(),
            response: String::new(),
            explanation: String::new(),
            created_at: Utc::now(),
            poll: None,
        }
    }

    pub fn from_exchange(
        command: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            prompt: prompt.into(),
            response: response.into(),
            explanation: String::new(),
            created_at: Utc::now(),
            poll: None,
        }
    }
}

/// Resolved poll parameters for one crumb, defaults already applied.
#[derive(Debug, Clone)]
pub struct ResolvedPoll {
    pub command: String,
    pub interval_secs: u64,
    pub continuous: bool,
    pub prompt: String,
}

/// Path-based store over `crumbs.json`. Every operation reads the file
/// fresh and writes it back whole, so concurrent ducky processes see each
/// other's edits. A corrupt or missing file reads as empty.
#[derive(Debug, Clone)]
pub struct CrumbStore {
    path: PathBuf,
}

impl CrumbStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("crumbs.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, Crumb> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    target = "ducky::crumbs",
                    path = %self.path.display(),
                    error = %e,
                    "crumbs file unreadable, starting empty"
                );
                BTreeMap::new()
            }
        }
    }

    fn store(&self, crumbs: &BTreeMap<String, Crumb>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(crumbs)?)?;
        Ok(())
    }

    pub fn save(&self, name: &str, crumb: Crumb) -> Result<()> {
        let mut crumbs = self.load();
        crumbs.insert(name.to_string(), crumb);
        self.store(&crumbs)
    }

    pub fn get(&self, name: &str) -> Option<Crumb> {
        self.load().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.load().contains_key(name)
    }

    /// Remove a crumb. Ok(false) when the name was not present.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut crumbs = self.load();
        if crumbs.remove(name).is_none() {
            return Ok(false);
        }
        self.store(&crumbs)?;
        Ok(true)
    }

    pub fn set_explanation(&self, name: &str, explanation: &str) -> Result<bool> {
        let mut crumbs = self.load();
        let Some(crumb) = crumbs.get_mut(name) else {
            return Ok(false);
        };
        crumb.explanation = explanation.to_string();
        self.store(&crumbs)?;
        Ok(true)
    }

    pub fn list(&self) -> Vec<(String, Crumb)> {
        self.load().into_iter().collect()
    }

    /// Look up a crumb and fold its stored poll defaults over the engine
    /// defaults. Flag overrides are applied by the caller on top.
    pub fn resolve_poll(&self, name: &str) -> Result<ResolvedPoll> {
        let crumb = self.get(name).ok_or_else(|| DuckyError::CrumbNotFound {
            name: name.to_string(),
        })?;

        let defaults = crumb.poll.unwrap_or_default();
        Ok(ResolvedPoll {
            command: crumb.command,
            interval_secs: defaults.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            continuous: defaults.continuous.unwrap_or(false),
            prompt: defaults
                .prompt
                .unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string()),
        })
    }
}

impl ResolvedPoll {
    pub fn mode(&self) -> PollMode {
        if self.continuous {
            PollMode::Continuous
        } else {
            PollMode::Interval
        }
    }
}

/// Replace `${VAR}` and `$var` placeholders with positional arguments.
///
/// The first unique variable name maps to `args[0]`, the second to
/// `args[1]`, and so on; a name that repeats gets the same argument each
/// time. Names left without an argument fall back to the process
/// environment, and stay literal when that also misses.
pub fn substitute_placeholders(command: &str, args: &[String]) -> String {
    static PLACEHOLDER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}|\$(\w+)").unwrap());

    let mut unique_vars: Vec<&str> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(command) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if !unique_vars.contains(&name) {
            unique_vars.push(name);
        }
    }

    let var_map: BTreeMap<&str, &str> = unique_vars
        .iter()
        .zip(args.iter())
        .map(|(name, value)| (*name, value.as_str()))
        .collect();

    PLACEHOLDER
        .replace_all(command, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if let Some(value) = var_map.get(name) {
                return value.to_string();
            }
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
