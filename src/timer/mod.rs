//! Shared on-air timers
//!
//! Two singleton timers drive the show: a count-up stopwatch and a countdown
//! to an absolute deadline. Their authoritative state lives in the document
//! store; the engines here validate admin commands against the stored state
//! and write the next state back. Elapsed and remaining time are never stored
//! while a timer runs, every observer derives them from a fixed reference
//! instant and its own clock.
//!
//! Commands are plain read-then-write cycles with no compare-and-swap, so two
//! admins issuing commands at the same moment race and the last write wins.

pub mod countdown;
pub mod format;
pub mod stopwatch;

pub use countdown::{remaining_time, CountdownEngine, CountdownPhase, CountdownState, Remaining};
pub use format::Layout;
pub use stopwatch::{current_elapsed, StopwatchEngine, StopwatchPhase, StopwatchState};

use std::fmt;

/// Actor recorded on documents created by initialization
pub const SYSTEM_ACTOR: &str = "system";

/// Which of the two singleton timers a command or reading refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Stopwatch,
    Countdown,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Stopwatch => write!(f, "stopwatch"),
            TimerKind::Countdown => write!(f, "countdown"),
        }
    }
}

/// Result of a command that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New state was written to the store
    Applied,
    /// Current state already satisfied the command, nothing was written
    Unchanged,
}
