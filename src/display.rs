//! Display sink: logging init plus stdout rendering for replies, shell
//! runs, and poll events. Rendering is decoupled from the engines; they
//! emit reports and this module decides how they look.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::poll::{PollEvent, StopReason, TickOutcome};
use crate::shell::ShellResult;

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const MAGENTA: &str = "\x1b[35m";
pub const CYAN: &str = "\x1b[36m";
pub const RESET: &str = "\x1b[0m";

/// Combined line count past which shell output gets truncated.
const TRUNCATE_THRESHOLD: usize = 10;
const STDOUT_SHOWN: usize = 8;
const STDERR_SHOWN: usize = 5;

pub fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Print an assistant reply: the cleaned prose, then the suggestion line
/// when a command was extracted.
pub fn print_reply(display_text: &str, command: Option<&str>) {
    let text = display_text.trim();
    if !text.is_empty() {
        println!("{text}");
    }
    if let Some(command) = command {
        println!();
        println!("{BOLD}{CYAN}suggested:{RESET} {command}");
        println!("{DIM}(press Enter to run it){RESET}");
    }
}

pub fn print_command_banner(command: &str) {
    println!("{BOLD}{MAGENTA}$ {command}{RESET}");
}

/// Print a shell run the way the interactive loop shows it. Long output is
/// truncated so a chatty command does not swamp the terminal.
pub fn print_shell_result(result: &ShellResult, truncate: bool) {
    let stdout = result.stdout.trim_end();
    let stderr = result.stderr.trim_end();
    let stdout_lines: Vec<&str> = if stdout.is_empty() {
        Vec::new()
    } else {
        stdout.lines().collect()
    };
    let stderr_lines: Vec<&str> = if stderr.is_empty() {
        Vec::new()
    } else {
        stderr.lines().collect()
    };
    let should_truncate = truncate && stdout_lines.len() + stderr_lines.len() > TRUNCATE_THRESHOLD;

    if !stdout_lines.is_empty() {
        if should_truncate && stdout_lines.len() > STDOUT_SHOWN {
            println!("{}", stdout_lines[..STDOUT_SHOWN].join("\n"));
            println!(
                "{DIM}... ({} more lines){RESET}",
                stdout_lines.len() - STDOUT_SHOWN
            );
        } else {
            println!("{stdout}");
        }
    }

    if !stderr_lines.is_empty() {
        if !stdout_lines.is_empty() {
            println!();
        }
        println!("{BOLD}{RED}[stderr]{RESET}");
        if should_truncate && stderr_lines.len() > STDERR_SHOWN {
            println!("{RED}{}{RESET}", stderr_lines[..STDERR_SHOWN].join("\n"));
            println!(
                "{DIM}... ({} more lines){RESET}",
                stderr_lines.len() - STDERR_SHOWN
            );
        } else {
            println!("{RED}{stderr}{RESET}");
        }
    }

    if result.exit_code != 0 {
        println!("{YELLOW}(exit status {}){RESET}", result.exit_code);
    } else if stdout_lines.is_empty() && stderr_lines.is_empty() {
        println!("{YELLOW}(command produced no output){RESET}");
    }
}

/// Render one poll event. Tick analysis is printed like a reply; lifecycle
/// and warnings are one-liners.
pub fn print_poll_event(event: &PollEvent) {
    match event {
        PollEvent::Started {
            crumb,
            mode,
            interval,
        } => {
            println!(
                "{DIM}[poll]{RESET} '{crumb}' started ({} mode, every {}s)",
                mode.as_str(),
                interval.as_secs()
            );
        }
        PollEvent::Tick(report) => match &report.outcome {
            TickOutcome::Analyzed(text) => {
                println!(
                    "{DIM}[poll tick {} at {}]{RESET}",
                    report.index,
                    report.at.format("%H:%M:%S")
                );
                print_reply(text, None);
            }
            TickOutcome::Skipped => {}
            TickOutcome::Failed(reason) => {
                println!(
                    "{YELLOW}[poll tick {}] analysis failed: {reason}{RESET}",
                    report.index
                );
            }
        },
        PollEvent::Overrun { index, elapsed } => {
            println!(
                "{YELLOW}[poll] tick {index} ran {}ms, past the interval; next run deferred{RESET}",
                elapsed.as_millis()
            );
        }
        PollEvent::Stopped { crumb, reason } => {
            let why = match reason {
                StopReason::Cancelled => "stopped".to_string(),
                StopReason::ChildExited { code: Some(code) } => {
                    format!("script exited with status {code}")
                }
                StopReason::ChildExited { code: None } => "script exited".to_string(),
                StopReason::SpawnFailed(e) => format!("script failed to start: {e}"),
            };
            println!("{DIM}[poll]{RESET} '{crumb}' ended: {why}");
        }
    }
}

pub fn print_help() {
    println!(
        "{BOLD}commands{RESET}
  /run                    run the most recently suggested command
  /clear, /reset          clear conversation history
  /model [name]           show or switch the active model
  /crumbs                 list saved crumbs
  /crumb <name>           save the last suggested command as a crumb
  /crumb add <name> <cmd> save a crumb directly
  /crumb del <name>       delete a crumb
  /poll <name> [-i secs] [-c] [-p prompt]
                          poll a crumb's script (/poll alone shows status)
  /stop                   stop the active poll
  /help                   this text
  !<cmd>                  run a shell command directly
  <crumb> [args...]       run a saved crumb, filling ${{VAR}} placeholders
  (empty Enter)           run the pending command, or explain the last output"
    );
}
