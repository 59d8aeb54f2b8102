//! hackacast-live
//!
//! Operator tool for the Hackacast on-air timers: issue admin commands,
//! print the stored state, or follow a timer live in the terminal.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt::Debug;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hackacast_live::bridge::LiveModel;
use hackacast_live::question::{ActiveQuestionCache, StoreQuestionSource};
use hackacast_live::timer::format::{format_compact, parse_digits};
use hackacast_live::timer::{current_elapsed, remaining_time, CountdownState, StopwatchState};
use hackacast_live::{
    logging, parse_deadline, AdminCommand, AdminConsole, AdminStatus, BridgeHandle, BridgeOptions,
    Clock, Config, CountdownEngine, DocumentStore, FileStore, Layout, StopwatchEngine,
    SystemClock, TimerBridge, TimerError,
};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Keep the guard alive until exit so buffered log lines are flushed
    let _log_guard = logging::init_logging()?;

    let config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config, args))
}

async fn run(config: Config, args: Vec<String>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let file_store = FileStore::open(&config.store.root, clock.clone())
        .with_context(|| format!("Failed to open store at {:?}", config.store.root))?;
    info!("Using document store at {:?}", file_store.root());
    let store: Arc<dyn DocumentStore> = Arc::new(file_store);

    let console = AdminConsole::new(
        StopwatchEngine::new(store.clone(), clock.clone(), &config.timers.stopwatch_path),
        CountdownEngine::new(store.clone(), clock.clone(), &config.timers.countdown_path),
        config.actor_id(),
    );
    let options = BridgeOptions::from(&config.timers);

    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["init"] => {
            console.initialize().await.map_err(operator_error)?;
            println!("Timer documents ready in {:?}", config.store.root);
        }
        ["status"] => print_status(&console).await?,
        ["stopwatch", action] => {
            let command = match *action {
                "start" => AdminCommand::StartStopwatch,
                "pause" => AdminCommand::PauseStopwatch,
                "reset" => AdminCommand::ResetStopwatch,
                other => bail!("Unknown stopwatch action '{}'", other),
            };
            run_command(&console, command).await?;
        }
        ["countdown", "set", deadline] => {
            let deadline = parse_deadline(deadline).map_err(operator_error)?;
            run_command(&console, AdminCommand::SetDeadline(deadline)).await?;
        }
        ["countdown", "in", seconds] => {
            let seconds: u64 = seconds
                .parse()
                .with_context(|| format!("'{}' is not a number of seconds", seconds))?;
            run_command(
                &console,
                AdminCommand::SetDuration(Duration::from_secs(seconds)),
            )
            .await?;
        }
        ["countdown", action] => {
            let command = match *action {
                "start" => AdminCommand::StartCountdown,
                "pause" => AdminCommand::PauseCountdown,
                "reset" => AdminCommand::ResetCountdown,
                other => bail!("Unknown countdown action '{}'", other),
            };
            run_command(&console, command).await?;
        }
        ["watch", "stopwatch"] => {
            let handle = TimerBridge::stopwatch(console.stopwatch(), options).spawn();
            watch_live::<StopwatchState>(handle, shutdown_token()?).await;
        }
        ["watch", "countdown"] => {
            let handle = TimerBridge::countdown(console.countdown(), options).spawn();
            watch_live::<CountdownState>(handle, shutdown_token()?).await;
        }
        ["question"] => watch_question(&config, store).await?,
        _ => {
            print_help();
            bail!("Unrecognized command: {}", args.join(" "));
        }
    }

    Ok(())
}

async fn run_command(console: &AdminConsole, command: AdminCommand) -> Result<()> {
    let mut status = console.status();
    let result = console.execute(command).await;

    while let Ok(event) = status.try_recv() {
        if let AdminStatus::Completed {
            kind,
            command,
            outcome,
        } = event
        {
            println!("{} {}: {:?}", kind, command, outcome);
        }
    }

    result.map(|_| ()).map_err(operator_error)
}

async fn print_status(console: &AdminConsole) -> Result<()> {
    let now = console.stopwatch().clock().now();

    match console.stopwatch().fetch().await.map_err(operator_error)? {
        Some(state) => println!(
            "stopwatch  {:<8} {}  (updated by {})",
            state.state.as_str(),
            format_compact(current_elapsed(&state, now)),
            state.updated_by
        ),
        None => println!("stopwatch  not initialized"),
    }

    match console.countdown().fetch().await.map_err(operator_error)? {
        Some(state) => {
            let deadline = state
                .deadline_at
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "no deadline".to_string());
            println!(
                "countdown  {:<8} {}  deadline {}  (updated by {})",
                state.state.as_str(),
                format_compact(remaining_time(&state, now).ms),
                deadline,
                state.updated_by
            );
        }
        None => println!("countdown  not initialized"),
    }

    Ok(())
}

/// Cancelled on Ctrl+C
fn shutdown_token() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        handler_token.cancel();
    })?;
    Ok(token)
}

async fn watch_live<M: LiveModel>(mut handle: BridgeHandle<M::Phase>, shutdown: CancellationToken) {
    let layout = M::LAYOUT;
    let mut warned_overflow = false;
    let mut reading = handle.reading();

    loop {
        if !warned_overflow && !layout.fits(reading.duration_ms) {
            warn!(
                "{} no longer fits a {}-digit display",
                format_compact(reading.duration_ms),
                layout.slot_count()
            );
            warned_overflow = true;
        }
        render(layout, &reading.digits, reading.phase, reading.loading, &reading.error);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = handle.changed() => match next {
                Some(next) => reading = next,
                None => break,
            },
        }
    }

    println!();
    handle.unsubscribe();
}

fn render<P: Debug>(layout: Layout, digits: &[u8], phase: P, loading: bool, error: &Option<String>) {
    let text = parse_digits(digits, layout).unwrap_or_else(|| "--".to_string());
    let status = if loading {
        "loading".to_string()
    } else {
        format!("{:?}", phase).to_lowercase()
    };
    let note = error.as_deref().map(|e| format!("  ! {}", e)).unwrap_or_default();

    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "\r{}  [{}]{}\x1b[K", text, status, note);
    let _ = stdout.flush();
}

async fn watch_question(config: &Config, store: Arc<dyn DocumentStore>) -> Result<()> {
    let source = Arc::new(StoreQuestionSource::new(store, &config.questions.collection));
    let cache = Arc::new(ActiveQuestionCache::new(
        source,
        Duration::from_millis(config.questions.cache_ttl_ms),
    ));
    let mut updates = cache.subscribe();
    let poller = cache.spawn_polling(Duration::from_millis(config.questions.poll_interval_ms));
    let shutdown = shutdown_token()?;

    match cache.get().await {
        Ok(question) => print_question(question.as_ref()),
        Err(e) => warn!("Active question lookup failed: {}", e),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let question = updates.borrow_and_update().clone();
                print_question(question.as_ref());
            }
        }
    }

    poller.stop();
    Ok(())
}

fn print_question(question: Option<&hackacast_live::question::Question>) {
    match question {
        Some(q) => println!("[{}] {}", q.edition, q.question_text),
        None => println!("(no question on screen)"),
    }
}

fn operator_error(e: TimerError) -> anyhow::Error {
    warn!("{}", e);
    anyhow!(e.notice())
}

fn print_help() {
    println!("hackacast-live - Shared on-air timers for the Hackacast Q&A show");
    println!();
    println!("USAGE:");
    println!("    hackacast-live <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    init                          Create missing timer documents");
    println!("    status                        Print both timers");
    println!("    stopwatch start|pause|reset   Control the stopwatch");
    println!("    countdown set <DATETIME>      Set the deadline (YYYY-MM-DDTHH:MM or RFC 3339)");
    println!("    countdown in <SECONDS>        Set the deadline relative to now");
    println!("    countdown start|pause|reset   Control the countdown");
    println!("    watch stopwatch|countdown     Follow a timer live until Ctrl+C");
    println!("    question                      Follow the active question until Ctrl+C");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help    Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG            Set log level (e.g., debug, info, warn)");
    println!("    HACKACAST_CONFIG    Config file path override");
    println!("    HACKACAST_LOG_PATH  Log directory override");
}
