//! Polling engine: runs a crumb's script on a schedule and routes captured
//! output through the session's analysis path.
//!
//! A poll is an owned task handle plus a single-writer stop channel. The
//! stop initiator is the only writer and the poll loop is the only reader;
//! cancellation is cooperative and observed between ticks. Ticks are
//! strictly sequential — a script that outlives the interval defers the
//! next tick instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::backend::PromptMode;
use crate::session::Session;
use crate::shell::{self, StreamStatus};

/// Interval used when neither the crumb nor the caller specifies one.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Analysis prompt used when neither the crumb nor the caller supplies one.
pub const DEFAULT_ANALYSIS_PROMPT: &str =
    "Analyze this output. Summarize what changed and point out anything that looks wrong.";

/// How long a continuous-mode child gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(1500);

/// How the target script is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Run the script to completion every tick.
    Interval,
    /// Run the script once and sample its stdout stream every tick.
    Continuous,
}

impl PollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Interval => "interval",
            PollMode::Continuous => "continuous",
        }
    }
}

/// Immutable per-poll configuration. A new poll replaces it wholesale;
/// nothing mutates it in place.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Crumb name, for display and log correlation.
    pub crumb: String,
    /// The script command line to invoke.
    pub command: String,
    pub mode: PollMode,
    pub interval: Duration,
    /// Analysis prompt prepended to each captured chunk.
    pub prompt: String,
}

/// Lifecycle phase of the poll task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Why a poll ended.
#[derive(Debug, Clone)]
pub enum StopReason {
    /// The stop signal was observed.
    Cancelled,
    /// The continuous-mode subprocess ended on its own.
    ChildExited { code: Option<i32> },
    /// The continuous-mode subprocess never started.
    SpawnFailed(String),
}

/// What one tick produced.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Output was submitted; this is the analysis text.
    Analyzed(String),
    /// Nothing captured, nothing submitted.
    Skipped,
    /// The tick's submission failed; the poll keeps going.
    Failed(String),
}

/// Per-tick summary: the minimum contract a display layer needs.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub index: u64,
    pub at: DateTime<Utc>,
    pub captured_bytes: usize,
    pub outcome: TickOutcome,
}

/// Lifecycle and tick events pushed to the display sink.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Started {
        crumb: String,
        mode: PollMode,
        interval: Duration,
    },
    Tick(TickReport),
    /// A tick took longer than the interval; the next one was deferred.
    Overrun { index: u64, elapsed: Duration },
    Stopped { crumb: String, reason: StopReason },
}

/// Owned handle to a running poll. Dropping it does not stop the poll;
/// call [`PollHandle::stop`] so cancellation is fully awaited — that is
/// what keeps "at most one poll running" enforceable by the caller.
pub struct PollHandle {
    config: PollConfig,
    stop: watch::Sender<bool>,
    phase: watch::Receiver<PollPhase>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Spawn the poll task and hand back its handle.
    pub fn spawn(
        config: PollConfig,
        session: Arc<Session>,
        events: mpsc::UnboundedSender<PollEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(PollPhase::Idle);
        let task_config = config.clone();
        let task = tokio::spawn(async move {
            run_poll(task_config, session, events, stop_rx, phase_tx).await;
        });

        Self {
            config,
            stop: stop_tx,
            phase: phase_rx,
            task,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn phase(&self) -> PollPhase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the poll to stop and wait until it has fully wound down,
    /// including termination of any continuous-mode child.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

async fn run_poll(
    config: PollConfig,
    session: Arc<Session>,
    events: mpsc::UnboundedSender<PollEvent>,
    stop_rx: watch::Receiver<bool>,
    phase_tx: watch::Sender<PollPhase>,
) {
    let _ = phase_tx.send(PollPhase::Running);
    let _ = events.send(PollEvent::Started {
        crumb: config.crumb.clone(),
        mode: config.mode,
        interval: config.interval,
    });
    session.record_note(format!(
        "(poll '{}' started, {} mode, every {}s)",
        config.crumb,
        config.mode.as_str(),
        config.interval.as_secs()
    ));
    tracing::info!(
        target = "ducky::poll",
        crumb = %config.crumb,
        mode = config.mode.as_str(),
        interval_secs = config.interval.as_secs(),
        "poll started"
    );

    let reason = match config.mode {
        PollMode::Interval => run_interval(&config, &session, &events, stop_rx, &phase_tx).await,
        PollMode::Continuous => {
            run_continuous(&config, &session, &events, stop_rx, &phase_tx).await
        }
    };

    session.record_note(format!("(poll '{}' stopped)", config.crumb));
    tracing::info!(target = "ducky::poll", crumb = %config.crumb, reason = ?reason, "poll stopped");
    let _ = events.send(PollEvent::Stopped {
        crumb: config.crumb.clone(),
        reason,
    });
    let _ = phase_tx.send(PollPhase::Stopped);
}

async fn run_interval(
    config: &PollConfig,
    session: &Session,
    events: &mpsc::UnboundedSender<PollEvent>,
    mut stop_rx: watch::Receiver<bool>,
    phase_tx: &watch::Sender<PollPhase>,
) -> StopReason {
    let mut ticker = time::interval_at(time::Instant::now() + config.interval, config.interval);
    // A tick that outlives the interval defers the next one instead of
    // letting missed ticks burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                let _ = phase_tx.send(PollPhase::Stopping);
                return StopReason::Cancelled;
            }
            _ = ticker.tick() => {
                index += 1;
                let started = std::time::Instant::now();
                let report = interval_tick(config, session, index).await;
                let _ = events.send(PollEvent::Tick(report));

                let elapsed = started.elapsed();
                if elapsed > config.interval {
                    tracing::warn!(
                        target = "ducky::poll",
                        crumb = %config.crumb,
                        tick = index,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "tick outlived the interval; next run deferred"
                    );
                    let _ = events.send(PollEvent::Overrun { index, elapsed });
                }
            }
        }
    }
}

/// One interval-mode tick: run the script end-to-end and submit whatever
/// it produced. A nonzero exit is submitted with a note rather than
/// aborting the poll — an analyzable failure beats silence. Empty output
/// from a clean exit is skipped entirely.
async fn interval_tick(config: &PollConfig, session: &Session, index: u64) -> TickReport {
    let at = Utc::now();

    match shell::run(&config.command).await {
        Ok(result) => {
            let captured_bytes = result.stdout.len();
            if result.exit_code == 0 && result.stdout.trim().is_empty() {
                return TickReport {
                    index,
                    at,
                    captured_bytes,
                    outcome: TickOutcome::Skipped,
                };
            }

            let mut payload = result.stdout.clone();
            if result.exit_code != 0 {
                if !result.stderr.trim().is_empty() {
                    payload.push_str(&format!("\n[stderr]\n{}", result.stderr.trim_end()));
                }
                payload.push_str(&format!("\n(script exited with status {})", result.exit_code));
            }
            submit_for_analysis(config, session, index, at, captured_bytes, &payload).await
        }
        Err(e) => {
            // Spawn failure in interval mode is non-fatal: the note goes
            // through the same analysis pipeline.
            let payload = format!("(script failed to start: {e})");
            submit_for_analysis(config, session, index, at, 0, &payload).await
        }
    }
}

async fn run_continuous(
    config: &PollConfig,
    session: &Session,
    events: &mpsc::UnboundedSender<PollEvent>,
    mut stop_rx: watch::Receiver<bool>,
    phase_tx: &watch::Sender<PollPhase>,
) -> StopReason {
    let mut child = match shell::spawn_stream(&config.command) {
        Ok(child) => child,
        Err(e) => return StopReason::SpawnFailed(e.to_string()),
    };

    let mut ticker = time::interval_at(time::Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                let _ = phase_tx.send(PollPhase::Stopping);
                // Termination is requested and awaited before returning,
                // so cancellation never leaves the child behind.
                let _ = child.terminate(TERMINATE_GRACE).await;
                return StopReason::Cancelled;
            }
            _ = ticker.tick() => {
                index += 1;
                let at = Utc::now();
                let (chunk, status) = child.drain();

                if chunk.trim().is_empty() {
                    let _ = events.send(PollEvent::Tick(TickReport {
                        index,
                        at,
                        captured_bytes: chunk.len(),
                        outcome: TickOutcome::Skipped,
                    }));
                } else {
                    let report =
                        submit_for_analysis(config, session, index, at, chunk.len(), &chunk).await;
                    let _ = events.send(PollEvent::Tick(report));
                }

                if status == StreamStatus::Closed {
                    let _ = phase_tx.send(PollPhase::Stopping);
                    let code = child.exit_code();
                    let _ = child.terminate(TERMINATE_GRACE).await;
                    return StopReason::ChildExited { code };
                }
            }
        }
    }
}

async fn submit_for_analysis(
    config: &PollConfig,
    session: &Session,
    index: u64,
    at: DateTime<Utc>,
    captured_bytes: usize,
    payload: &str,
) -> TickReport {
    let prompt = format!("{}\n\n{}", config.prompt, payload);
    let outcome = match session.submit(&prompt, PromptMode::Analysis).await {
        Ok(reply) => TickOutcome::Analyzed(reply.display_text),
        Err(e) => {
            tracing::warn!(
                target = "ducky::poll",
                crumb = %config.crumb,
                tick = index,
                error = %e,
                "analysis submission failed"
            );
            TickOutcome::Failed(e.to_string())
        }
    };

    TickReport {
        index,
        at,
        captured_bytes,
        outcome,
    }
}
