//! Hackacast live timers
//!
//! Shared real-time stopwatch and countdown for the Hackacast anonymous Q&A
//! show, plus the active-question lookup used by the public display. Timer
//! state lives in a document store; every client derives the displayed time
//! locally from the stored reference instants.

pub mod admin;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod question;
pub mod store;
pub mod timer;

pub use admin::{parse_deadline, AdminCommand, AdminConsole, AdminStatus};
pub use bridge::{BridgeHandle, BridgeOptions, LiveReading, TimerBridge};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{SnapshotError, StoreError, TimerError, TimerResult};
pub use store::{DocumentStore, FileStore, MemoryStore};
pub use timer::{CountdownEngine, Layout, Outcome, StopwatchEngine, TimerKind};
