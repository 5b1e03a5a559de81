pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    attach_impl, detach_impl, get_timer_state_impl, pause_impl, reset_cycle_impl, resume_impl,
    skip_impl, start_break_impl, start_focus_impl, stop_impl, to_timer_state_response, AppState,
    TimerStateResponse,
};
use clap::{Parser, Subcommand};
use domain::models::TimerStatus;
use infrastructure::error::InfraError;
use infrastructure::logging::init_tracing;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;

/// Focus timer with server-tracked focus sessions
#[derive(Debug, Parser)]
#[command(name = "focus")]
#[command(about = "Pomodoro focus timer that keeps a planning server informed")]
#[command(version)]
#[command(after_help = r#"EXAMPLES:
    focus start                    # 25-minute focus session
    focus start 50 --context p-12  # 50 minutes linked to a priority
    focus watch                    # follow the countdown until the phase ends
    focus break                    # start the break waiting after a focus
    focus break --long 20          # standalone 20-minute long break
    focus stop --completed         # end early but count it as done on the server
"#)]
struct Cli {
    /// Workspace holding config/, state/ and logs/ (default: current directory)
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Print the timer state as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a focus session
    #[command(alias = "s")]
    Start {
        /// Duration in minutes (default: focusMinutes from timer.json)
        #[arg(value_name = "MINS")]
        duration: Option<u32>,

        /// Planning item this session works on
        #[arg(long)]
        context: Option<String>,

        /// Stay attached and show the countdown
        #[arg(long)]
        watch: bool,
    },

    /// Start a break
    #[command(alias = "b")]
    Break {
        /// Duration in minutes (default: from timer.json)
        #[arg(value_name = "MINS")]
        duration: Option<u32>,

        /// Take a long break
        #[arg(long, conflicts_with = "short")]
        long: bool,

        /// Take a short break
        #[arg(long)]
        short: bool,
    },

    /// Pause the running phase
    Pause,

    /// Resume a paused phase
    Resume,

    /// Stop and return to idle
    #[command(alias = "end")]
    Stop {
        /// Report the focus session as completed instead of interrupted
        #[arg(long)]
        completed: bool,
    },

    /// Skip the pending break
    Skip,

    /// Stop and reset the completed focus count
    Reset,

    /// Show the timer state
    #[command(alias = "st")]
    Status,

    /// Follow the countdown until the phase ends (Ctrl-C detaches)
    Watch,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace.clone() {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("error: cannot resolve working directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(state.logs_dir());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: cannot start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Commands::Status);
    runtime.block_on(async {
        attach_impl(&state).await;
        let (name, result) = execute(&state, command, cli.json).await;
        detach_impl(&state).await;

        match result {
            Ok(timer) => {
                print_state(&timer, cli.json);
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("error: {}", state.command_error(name, &error));
                ExitCode::FAILURE
            }
        }
    })
}

async fn execute(
    state: &AppState,
    command: Commands,
    json: bool,
) -> (&'static str, Result<TimerStateResponse, InfraError>) {
    match command {
        Commands::Start {
            duration,
            context,
            watch,
        } => {
            let started = start_focus_impl(state, context, duration).await;
            match started {
                Ok(timer) if watch => {
                    print_state(&timer, json);
                    ("start_focus", watch_timer(state, json).await)
                }
                other => ("start_focus", other),
            }
        }
        Commands::Break {
            duration,
            long,
            short,
        } => {
            let kind = if long {
                Some("long".to_string())
            } else if short {
                Some("short".to_string())
            } else {
                None
            };
            ("start_break", start_break_impl(state, kind, duration).await)
        }
        Commands::Pause => ("pause", pause_impl(state).await),
        Commands::Resume => ("resume", resume_impl(state).await),
        Commands::Stop { completed } => ("stop", Ok(stop_impl(state, completed).await)),
        Commands::Skip => ("skip", skip_impl(state).await),
        Commands::Reset => ("reset_cycle", Ok(reset_cycle_impl(state).await)),
        Commands::Status => ("status", Ok(get_timer_state_impl(state).await)),
        Commands::Watch => ("watch", watch_timer(state, json).await),
    }
}

/// Keeps the tick loop attached until the current phase completes or the
/// user presses Ctrl-C.
async fn watch_timer(state: &AppState, json: bool) -> Result<TimerStateResponse, InfraError> {
    let engine = state.engine();
    let mut updates = engine.subscribe();
    let mut events = engine.phase_events();

    let current = get_timer_state_impl(state).await;
    if !current.is_running {
        return Ok(current);
    }
    if !json {
        render_progress(&current);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let timer = to_timer_state_response(&updates.borrow_and_update());
                if !json {
                    render_progress(&timer);
                }
            }
            event = events.recv() => match event {
                Ok(_) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            },
            _ = &mut ctrl_c => break,
        }
    }
    if !json {
        println!();
    }

    Ok(get_timer_state_impl(state).await)
}

fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

fn describe(timer: &TimerStateResponse) -> String {
    match timer.status {
        TimerStatus::Idle => format!(
            "Idle ({} focus ready)",
            format_clock(timer.remaining_seconds)
        ),
        TimerStatus::Running { phase } => format!(
            "{phase} running, {} left",
            format_clock(timer.remaining_seconds)
        ),
        TimerStatus::PausedByUser { phase } => format!(
            "{phase} paused, {} left",
            format_clock(timer.remaining_seconds)
        ),
        TimerStatus::AwaitingPhaseTransition { completed } => format!(
            "{completed} complete. Next: {} ({}); run `focus break` or `focus skip`",
            timer.phase.replace('_', " "),
            format_clock(timer.remaining_seconds)
        ),
    }
}

fn render_progress(timer: &TimerStateResponse) {
    const WIDTH: usize = 30;
    let filled = ((timer.progress * WIDTH as f64).round() as usize).min(WIDTH);
    let mut stdout = std::io::stdout();
    let _ = write!(
        stdout,
        "\r[{}{}] {}",
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        format_clock(timer.remaining_seconds)
    );
    let _ = stdout.flush();
}

fn print_state(timer: &TimerStateResponse, json: bool) {
    if json {
        match serde_json::to_string_pretty(timer) {
            Ok(payload) => println!("{payload}"),
            Err(error) => eprintln!("error: {error}"),
        }
        return;
    }

    println!("{}", describe(timer));
    println!("Completed focus sessions this cycle: {}", timer.completed_focus_count);
    if let Some(context_id) = timer.linked_context_id.as_deref() {
        println!("Working on: {context_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DurationConfig, TimerPhase, TimerState};
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn break_flags_parse() {
        let cli = Cli::try_parse_from(["focus", "break", "--long", "20"]).expect("parse");
        match cli.command {
            Some(Commands::Break {
                duration,
                long,
                short,
            }) => {
                assert_eq!(duration, Some(20));
                assert!(long);
                assert!(!short);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["focus", "break", "--long", "--short"]).is_err());
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(1_500), "25:00");
        assert_eq!(format_clock(59), "00:59");
        assert_eq!(format_clock(0), "00:00");
    }

    #[test]
    fn describe_names_pending_break() {
        let mut timer = TimerState::idle(&DurationConfig::default());
        timer.begin(TimerPhase::Focus, 1, None, None).expect("begin");
        timer.tick(&DurationConfig::default());

        let line = describe(&to_timer_state_response(&timer));
        assert!(line.starts_with("Focus complete"));
        assert!(line.contains("short break (05:00)"));
    }
}
