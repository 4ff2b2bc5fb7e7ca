use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use ducky::backend::{ModelBackend, OllamaBackend, PromptMode};
use ducky::config::{state_dir, Cli, Settings};
use ducky::crumbs::{substitute_placeholders, Crumb, CrumbStore};
use ducky::display::{self, CYAN, DIM, RESET, YELLOW};
use ducky::error::DuckyError;
use ducky::history::ConversationLog;
use ducky::poll::{PollConfig, PollEvent, PollHandle, PollMode};
use ducky::session::Session;
use ducky::shell::{self, ShellResult};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    display::init_logging(&cli.log_level).context("failed to initialise logging")?;

    let state_dir = state_dir();
    let settings = Settings::load(&state_dir);
    let connection = cli.connection(&settings);

    let backend = Arc::new(OllamaBackend::new(&connection.host, &connection.model));
    let session = Arc::new(Session::new(backend.clone()));
    let crumbs = CrumbStore::new(&state_dir);
    let log = ConversationLog::open(&state_dir);

    Settings {
        last_model: connection.model.clone(),
        last_host: connection.host.clone(),
    }
    .save(&state_dir);

    let (poll_tx, poll_rx) = mpsc::unbounded_channel();
    let mut app = App {
        backend,
        session,
        crumbs,
        log,
        state_dir,
        yolo: cli.yolo,
        pending_command: None,
        last_shell_result: None,
        active_poll: None,
        poll_tx,
    };

    // Piped input: read it all, answer once, exit.
    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin().read_to_string(&mut piped)?;
        let piped = piped.trim();
        if piped.is_empty() {
            println!("{YELLOW}No input received from stdin.{RESET}");
            return Ok(());
        }
        return app.run_once(piped, false).await;
    }

    if let Some(dir) = &cli.directory {
        app.seed_directory_context(dir).await?;
    }

    if let Some(prompt) = cli.single_prompt() {
        // A crumb name as the first word invokes the crumb instead of the
        // model.
        let words: Vec<String> = prompt.split_whitespace().map(ToOwned::to_owned).collect();
        if let Some(first) = words.first() {
            if app.crumbs.has(first) {
                let name = first.clone();
                return app.run_crumb_once(&name, &words[1..]).await;
            }
        }
        return app.run_once(&prompt, true).await;
    }

    app.run_interactive(poll_rx).await
}

struct App {
    backend: Arc<OllamaBackend>,
    session: Arc<Session>,
    crumbs: CrumbStore,
    log: ConversationLog,
    state_dir: PathBuf,
    yolo: bool,
    /// Command suggested by the most recent reply, runnable by empty Enter.
    pending_command: Option<String>,
    /// Most recent direct shell run, for /expand and empty-Enter explain.
    last_shell_result: Option<ShellResult>,
    active_poll: Option<PollHandle>,
    poll_tx: mpsc::UnboundedSender<PollEvent>,
}

impl App {
    /// One prompt, one reply, optionally run the suggestion. Used by both
    /// single-prompt and piped modes.
    async fn run_once(&mut self, prompt: &str, allow_run: bool) -> Result<()> {
        self.log.log_user(prompt);
        let reply = self.session.submit(prompt, PromptMode::Command).await?;
        self.log
            .log_assistant(&reply.display_text, reply.command.as_deref());
        display::print_reply(&reply.display_text, reply.command.as_deref());

        if let Some(command) = reply.command {
            if allow_run && (self.yolo || confirm("Run suggested command?")) {
                self.execute_shell(&command).await;
            }
        }
        Ok(())
    }

    async fn run_crumb_once(&mut self, name: &str, args: &[String]) -> Result<()> {
        let Some(crumb) = self.crumbs.get(name) else {
            return Err(DuckyError::CrumbNotFound {
                name: name.to_string(),
            }
            .into());
        };
        let command = substitute_placeholders(&crumb.command, args);

        println!("{CYAN}crumb: {name}{RESET}");
        if !crumb.explanation.is_empty() {
            println!("{DIM}{}{RESET}", crumb.explanation);
        }
        self.execute_shell(&command).await;
        Ok(())
    }

    async fn run_interactive(mut self, mut poll_rx: mpsc::UnboundedReceiver<PollEvent>) -> Result<()> {
        println!("Ducky is listening. /help for commands, ctrl-d to quit.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt_marker();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            self.handle_line(&line).await;
                            prompt_marker();
                        }
                        // EOF, ctrl-d.
                        None => break,
                    }
                }
                Some(event) = poll_rx.recv() => {
                    display::print_poll_event(&event);
                    if matches!(event, PollEvent::Stopped { .. }) {
                        // The poll wound down on its own; drop its handle.
                        if self.active_poll.as_ref().is_some_and(PollHandle::is_finished) {
                            self.active_poll = None;
                        }
                        prompt_marker();
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    if let Some(poll) = self.active_poll.take() {
                        println!();
                        poll.stop().await;
                        prompt_marker();
                    } else {
                        println!();
                        break;
                    }
                }
            }
        }

        if let Some(poll) = self.active_poll.take() {
            poll.stop().await;
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) {
        let stripped = line.trim();
        if stripped.is_empty() {
            self.handle_empty_enter().await;
            return;
        }

        // A crumb name as the first word invokes the crumb.
        let first_word = stripped.split_whitespace().next().unwrap_or_default();
        if !first_word.starts_with('/') && !first_word.starts_with('!') && self.crumbs.has(first_word)
        {
            let args: Vec<String> = stripped
                .split_whitespace()
                .skip(1)
                .map(ToOwned::to_owned)
                .collect();
            self.invoke_crumb(first_word, &args).await;
            return;
        }

        if let Some(command) = stripped.strip_prefix('!') {
            let command = command.trim().to_string();
            if command.is_empty() {
                println!("{YELLOW}Usage: !<command>{RESET}");
                return;
            }
            self.execute_shell(&command).await;
            self.pending_command = None;
            return;
        }

        match stripped.to_lowercase().as_str() {
            "/run" | ":run" => {
                self.run_pending().await;
                return;
            }
            "/clear" | "/reset" => {
                self.session.reset();
                self.pending_command = None;
                self.last_shell_result = None;
                println!("Conversation cleared.");
                return;
            }
            "/crumbs" => {
                self.show_crumbs();
                return;
            }
            "/expand" => {
                self.expand_last_output();
                return;
            }
            "/stop" => {
                match self.active_poll.take() {
                    Some(poll) => poll.stop().await,
                    None => println!("{YELLOW}No poll is running.{RESET}"),
                }
                return;
            }
            "/help" => {
                display::print_help();
                return;
            }
            _ => {}
        }

        if stripped == "/model" || stripped.starts_with("/model ") {
            self.handle_model(stripped.trim_start_matches("/model").trim())
                .await;
            return;
        }
        if stripped == "/poll" || stripped.starts_with("/poll ") {
            self.handle_poll(stripped.trim_start_matches("/poll").trim())
                .await;
            return;
        }
        if stripped == "/crumb" || stripped.starts_with("/crumb ") {
            self.handle_crumb(stripped.trim_start_matches("/crumb").trim())
                .await;
            return;
        }
        if stripped.starts_with('/') {
            println!("{YELLOW}Unknown command. /help lists what I know.{RESET}");
            return;
        }

        self.submit_prompt(stripped).await;
    }

    /// Empty Enter runs the pending suggestion if there is one, otherwise
    /// asks the model to explain the last shell output.
    async fn handle_empty_enter(&mut self) {
        if self.pending_command.is_some() {
            self.run_pending().await;
        } else if self.last_shell_result.is_some() {
            self.explain_last_output().await;
        } else {
            println!("{YELLOW}Nothing to run yet.{RESET}");
        }
    }

    async fn submit_prompt(&mut self, prompt: &str) {
        self.log.log_user(prompt);
        match self.session.submit(prompt, PromptMode::Command).await {
            Ok(reply) => {
                self.log
                    .log_assistant(&reply.display_text, reply.command.as_deref());
                display::print_reply(&reply.display_text, reply.command.as_deref());
                self.pending_command = reply.command;
            }
            Err(e) => println!("{YELLOW}{e}{RESET}"),
        }
    }

    async fn run_pending(&mut self) {
        let command = self
            .pending_command
            .take()
            .or_else(|| self.session.rerun_last().ok());
        match command {
            Some(command) => self.execute_shell(&command).await,
            None => println!("{YELLOW}No command has been suggested yet.{RESET}"),
        }
    }

    /// Run a command in the shell, print and record the result.
    async fn execute_shell(&mut self, command: &str) {
        display::print_command_banner(command);
        match shell::run(command).await {
            Ok(result) => {
                display::print_shell_result(&result, true);
                self.log.log_shell(&result);
                self.session.record_shell(&result);
                self.last_shell_result = Some(result);
            }
            Err(e) => println!("{YELLOW}{e}{RESET}"),
        }
    }

    async fn invoke_crumb(&mut self, name: &str, args: &[String]) {
        let Some(crumb) = self.crumbs.get(name) else {
            println!("{YELLOW}No crumb named '{name}'.{RESET}");
            return;
        };
        let command = substitute_placeholders(&crumb.command, args);
        self.execute_shell(&command).await;
    }

    async fn explain_last_output(&mut self) {
        let Some(summary) = self.session.last_assistant_text() else {
            println!("{YELLOW}No shell output to explain yet.{RESET}");
            return;
        };
        let prompt = format!(
            "The user ran a shell command above. Summarize the key findings from the output, \
             highlight problems if any, and suggest next steps. Do NOT suggest a shell command \
             or code snippet.\n\n{summary}"
        );
        match self.session.submit(&prompt, PromptMode::Analysis).await {
            Ok(reply) => {
                self.log.log_assistant(&reply.display_text, None);
                display::print_reply(&reply.display_text, None);
            }
            Err(e) => println!("{YELLOW}{e}{RESET}"),
        }
        self.last_shell_result = None;
    }

    fn expand_last_output(&self) {
        match &self.last_shell_result {
            Some(result) => {
                println!("{CYAN}[full output for: {}]{RESET}", result.command);
                display::print_shell_result(result, false);
            }
            None => println!("{YELLOW}No previous shell output to expand.{RESET}"),
        }
    }

    fn show_crumbs(&self) {
        let crumbs = self.crumbs.list();
        if crumbs.is_empty() {
            println!("{YELLOW}No crumbs saved yet. Use '/crumb <name>' to save one.{RESET}");
            return;
        }
        for (name, crumb) in crumbs {
            println!("{CYAN}{name}{RESET}  {}", crumb.command);
            if !crumb.explanation.is_empty() {
                println!("  {DIM}{}{RESET}", crumb.explanation);
            }
        }
    }

    async fn handle_model(&mut self, arg: &str) {
        if arg.is_empty() {
            println!("current model: {}", self.backend.model());
            match self.backend.list_models().await {
                Ok(models) if !models.is_empty() => {
                    println!("available:");
                    for model in models {
                        println!("  {model}");
                    }
                }
                Ok(_) => println!("{DIM}(no models reported by the host){RESET}"),
                Err(e) => println!("{YELLOW}could not list models: {e}{RESET}"),
            }
            return;
        }

        self.backend.set_model(arg);
        self.session
            .record_note(format!("(model switched to {arg})"));
        Settings {
            last_model: arg.to_string(),
            last_host: self.backend.base_url().to_string(),
        }
        .save(&self.state_dir);
        println!("model switched to {arg}");
    }

    async fn handle_crumb(&mut self, rest: &str) {
        let words: Vec<&str> = rest.split_whitespace().collect();
        match words.as_slice() {
            [] | ["help"] => {
                println!(
                    "/crumbs                 list saved crumbs
/crumb <name>           save the last suggested command as <name>
/crumb add <name> <cmd> save a crumb directly
/crumb del <name>       delete a crumb"
                );
            }
            ["add", ..] => match parse_crumb_add(&words) {
                Some((name, command)) => {
                    if let Err(e) = self.crumbs.save(&name, Crumb::new(command.clone())) {
                        println!("{YELLOW}could not save crumb: {e}{RESET}");
                        return;
                    }
                    println!("crumb '{name}' saved.");
                    self.generate_explanation(name, command);
                }
                None => println!("{YELLOW}Usage: /crumb add <name> <command>{RESET}"),
            },
            ["del", name] => match self.crumbs.delete(name) {
                Ok(true) => println!("crumb '{name}' deleted."),
                Ok(false) => println!("{YELLOW}No crumb named '{name}'.{RESET}"),
                Err(e) => println!("{YELLOW}could not delete crumb: {e}{RESET}"),
            },
            [name] => self.save_last_as_crumb(name).await,
            _ => println!("{YELLOW}Unknown crumb command. /crumb help for usage.{RESET}"),
        }
    }

    async fn save_last_as_crumb(&mut self, name: &str) {
        let command = match self.session.rerun_last() {
            Ok(command) => command,
            Err(_) => {
                println!("{YELLOW}No suggested command to save yet.{RESET}");
                return;
            }
        };
        let response = self.session.last_assistant_text().unwrap_or_default();
        let crumb = Crumb::from_exchange(command.clone(), "", response);
        if let Err(e) = self.crumbs.save(name, crumb) {
            println!("{YELLOW}could not save crumb: {e}{RESET}");
            return;
        }
        println!("crumb '{name}' saved.");
        self.generate_explanation(name.to_string(), command);
    }

    /// Fill in the crumb's explanation off the interactive path. Goes
    /// straight to the backend so it never touches conversation history.
    fn generate_explanation(&self, name: String, command: String) {
        let backend = self.backend.clone();
        let crumbs = self.crumbs.clone();
        tokio::spawn(async move {
            let prompt = format!(
                "Explain in one short sentence what this shell command does: {command}"
            );
            let messages = [ducky::backend::ChatMessage::new("user", prompt)];
            match backend.complete(&messages, PromptMode::Analysis).await {
                Ok(text) => {
                    let _ = crumbs.set_explanation(&name, text.trim());
                }
                Err(e) => {
                    tracing::debug!(
                        target = "ducky::crumbs",
                        crumb = %name,
                        error = %e,
                        "explanation generation failed"
                    );
                }
            }
        });
    }

    async fn handle_poll(&mut self, rest: &str) {
        if rest.is_empty() {
            match &self.active_poll {
                Some(poll) => {
                    let config = poll.config();
                    println!(
                        "polling '{}' ({} mode, every {}s)",
                        config.crumb,
                        config.mode.as_str(),
                        config.interval.as_secs()
                    );
                }
                None => println!("No poll is running. Usage: /poll <crumb> [-i secs] [-c] [-p prompt]"),
            }
            return;
        }

        let Some(words) = shlex::split(rest) else {
            println!("{YELLOW}Could not parse /poll arguments.{RESET}");
            return;
        };
        let config = match self.parse_poll_args(&words) {
            Ok(config) => config,
            Err(message) => {
                println!("{YELLOW}{message}{RESET}");
                return;
            }
        };

        // Only one poll at a time; replacing stops the old one first and
        // waits for it to wind down.
        if let Some(old) = self.active_poll.take() {
            old.stop().await;
        }
        self.active_poll = Some(PollHandle::spawn(
            config,
            self.session.clone(),
            self.poll_tx.clone(),
        ));
    }

    /// `<crumb> [-i secs] [-c] [-p prompt]`, flags overriding the crumb's
    /// stored poll defaults.
    fn parse_poll_args(&self, words: &[String]) -> std::result::Result<PollConfig, String> {
        let name = words
            .first()
            .ok_or("Usage: /poll <crumb> [-i secs] [-c] [-p prompt]")?;
        let resolved = self
            .crumbs
            .resolve_poll(name)
            .map_err(|e| e.to_string())?;

        let mut interval_secs = resolved.interval_secs;
        let mut continuous = resolved.continuous;
        let mut prompt = resolved.prompt;

        let mut rest = words[1..].iter();
        while let Some(flag) = rest.next() {
            match flag.as_str() {
                "-i" | "--interval" => {
                    interval_secs = rest
                        .next()
                        .and_then(|v| v.parse().ok())
                        .filter(|v| *v > 0)
                        .ok_or("-i needs a positive number of seconds")?;
                }
                "-c" | "--continuous" => continuous = true,
                "-p" | "--prompt" => {
                    prompt = rest.next().ok_or("-p needs a prompt string")?.clone();
                }
                other => return Err(format!("unknown /poll flag '{other}'")),
            }
        }

        Ok(PollConfig {
            crumb: name.clone(),
            command: resolved.command,
            mode: if continuous {
                PollMode::Continuous
            } else {
                PollMode::Interval
            },
            interval: Duration::from_secs(interval_secs),
            prompt,
        })
    }

    /// Read the files of a directory into the conversation as context for
    /// the prompts that follow.
    async fn seed_directory_context(&mut self, dir: &Path) -> Result<()> {
        let mut sections = Vec::new();
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                sections.push(format!("### {}\n{content}", path.display()));
            }
        }
        if sections.is_empty() {
            println!("{YELLOW}No readable files in {}.{RESET}", dir.display());
            return Ok(());
        }
        self.session.record_note(format!(
            "The user is working in {}. File contents follow.\n\n{}",
            dir.display(),
            sections.join("\n\n")
        ));
        println!("{DIM}loaded {} files from {}{RESET}", sections.len(), dir.display());
        Ok(())
    }
}

/// Split already-tokenized `/crumb add` arguments into the crumb name and
/// its command. The command is rebuilt from the tokens, so stray runs of
/// whitespace in the typed line cannot shift the name into the command.
fn parse_crumb_add(words: &[&str]) -> Option<(String, String)> {
    match words {
        ["add", name, command @ ..] if !command.is_empty() => {
            Some((name.to_string(), command.join(" ")))
        }
        _ => None,
    }
}

fn prompt_marker() {
    print!(">> ");
    let _ = std::io::stdout().flush();
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
