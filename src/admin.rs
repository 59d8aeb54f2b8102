//! Admin command console - routes operator commands to the timer engines

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{TimerError, TimerResult};
use crate::timer::{CountdownEngine, Outcome, StopwatchEngine, TimerKind};

/// Capacity of the status broadcast; slow receivers see `Lagged`
const STATUS_CAPACITY: usize = 32;

/// Commands an administrator can issue
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    StartStopwatch,
    PauseStopwatch,
    ResetStopwatch,
    /// Absolute countdown deadline
    SetDeadline(DateTime<Utc>),
    /// Countdown deadline relative to now
    SetDuration(Duration),
    StartCountdown,
    PauseCountdown,
    ResetCountdown,
}

impl AdminCommand {
    pub fn kind(&self) -> TimerKind {
        match self {
            AdminCommand::StartStopwatch
            | AdminCommand::PauseStopwatch
            | AdminCommand::ResetStopwatch => TimerKind::Stopwatch,
            _ => TimerKind::Countdown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdminCommand::StartStopwatch | AdminCommand::StartCountdown => "start",
            AdminCommand::PauseStopwatch | AdminCommand::PauseCountdown => "pause",
            AdminCommand::ResetStopwatch | AdminCommand::ResetCountdown => "reset",
            AdminCommand::SetDeadline(_) => "set-deadline",
            AdminCommand::SetDuration(_) => "set-duration",
        }
    }
}

/// Progress updates from the console
#[derive(Debug, Clone, PartialEq)]
pub enum AdminStatus {
    Started {
        kind: TimerKind,
        command: &'static str,
    },
    Completed {
        kind: TimerKind,
        command: &'static str,
        outcome: Outcome,
    },
    /// Command failed; `notice` is meant for the operator
    Failed {
        kind: TimerKind,
        command: &'static str,
        notice: String,
    },
}

pub struct AdminConsole {
    stopwatch: StopwatchEngine,
    countdown: CountdownEngine,
    actor: String,
    stopwatch_busy: AtomicBool,
    countdown_busy: AtomicBool,
    status_tx: broadcast::Sender<AdminStatus>,
}

impl AdminConsole {
    pub fn new(stopwatch: StopwatchEngine, countdown: CountdownEngine, actor: impl Into<String>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            stopwatch,
            countdown,
            actor: actor.into(),
            stopwatch_busy: AtomicBool::new(false),
            countdown_busy: AtomicBool::new(false),
            status_tx,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn stopwatch(&self) -> &StopwatchEngine {
        &self.stopwatch
    }

    pub fn countdown(&self) -> &CountdownEngine {
        &self.countdown
    }

    pub fn status(&self) -> broadcast::Receiver<AdminStatus> {
        self.status_tx.subscribe()
    }

    /// Create both timer documents if they are missing
    pub async fn initialize(&self) -> TimerResult<()> {
        self.stopwatch.initialize().await?;
        self.countdown.initialize().await?;
        Ok(())
    }

    /// Run one command.
    ///
    /// While a command for a timer is outstanding, further commands for the
    /// same timer are refused with [`TimerError::Busy`]. The other timer is
    /// unaffected.
    pub async fn execute(&self, command: AdminCommand) -> TimerResult<Outcome> {
        let kind = command.kind();
        let label = command.label();
        let Some(_guard) = InFlight::acquire(self.busy_flag(kind)) else {
            warn!("Refusing {} {}: previous command still running", kind, label);
            return Err(TimerError::Busy(kind));
        };

        self.emit(AdminStatus::Started {
            kind,
            command: label,
        });

        let result = self.dispatch(command).await;
        match &result {
            Ok(outcome) => {
                info!("{} {} completed: {:?}", kind, label, outcome);
                self.emit(AdminStatus::Completed {
                    kind,
                    command: label,
                    outcome: *outcome,
                });
            }
            Err(e) => {
                warn!("{} {} failed: {}", kind, label, e);
                self.emit(AdminStatus::Failed {
                    kind,
                    command: label,
                    notice: e.notice(),
                });
            }
        }
        result
    }

    async fn dispatch(&self, command: AdminCommand) -> TimerResult<Outcome> {
        let actor = self.actor.as_str();
        match command {
            AdminCommand::StartStopwatch => self.stopwatch.start(actor).await,
            AdminCommand::PauseStopwatch => self.stopwatch.pause(actor).await,
            AdminCommand::ResetStopwatch => self.stopwatch.reset(actor).await,
            AdminCommand::SetDeadline(deadline) => self.countdown.set_deadline(actor, deadline).await,
            AdminCommand::SetDuration(duration) => self.countdown.set_duration(actor, duration).await,
            AdminCommand::StartCountdown => self.countdown.start(actor).await,
            AdminCommand::PauseCountdown => self.countdown.pause(actor).await,
            AdminCommand::ResetCountdown => self.countdown.reset(actor).await,
        }
    }

    fn busy_flag(&self, kind: TimerKind) -> &AtomicBool {
        match kind {
            TimerKind::Stopwatch => &self.stopwatch_busy,
            TimerKind::Countdown => &self.countdown_busy,
        }
    }

    fn emit(&self, status: AdminStatus) {
        // No receivers is fine
        let _ = self.status_tx.send(status);
    }
}

/// Clears the busy flag when the command finishes or is dropped mid-flight
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

const LOCAL_DEADLINE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse an operator-entered deadline.
///
/// Accepts RFC 3339 (`2024-05-01T20:00:00Z`) or a local wall-clock time
/// without offset (`2024-05-01T20:00`), interpreted in the host time zone.
pub fn parse_deadline(input: &str) -> TimerResult<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in LOCAL_DEADLINE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    TimerError::Validation(format!("{} does not exist in the local time zone.", input))
                });
        }
    }

    Err(TimerError::Validation(format!(
        "Could not read deadline '{}'. Use YYYY-MM-DDTHH:MM or RFC 3339.",
        input
    )))
}
