use crate::application::bootstrap::bootstrap_workspace;
use crate::application::engine::{EngineOptions, FocusEngine};
use crate::domain::duration_policy::{next_break_phase, resolve, sound_enabled};
use crate::domain::models::{DurationConfig, TimerPhase, TimerState, TimerStatus};
use crate::infrastructure::config::{
    load_duration_config, load_gateway_config, save_duration_config,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::DesktopNotificationSink;
use crate::infrastructure::session_gateway::ReqwestSessionGateway;
use crate::infrastructure::snapshot_store::SqliteTimerSnapshotStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub type DesktopEngine =
    FocusEngine<ReqwestSessionGateway, SqliteTimerSnapshotStore, DesktopNotificationSink>;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    engine: DesktopEngine,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_options(workspace_root, EngineOptions::default())
    }

    pub fn with_options(
        workspace_root: PathBuf,
        options: EngineOptions,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let duration_config = load_duration_config(&bootstrap.config_dir)?;
        let gateway = ReqwestSessionGateway::new(&load_gateway_config(&bootstrap.config_dir)?)?;
        let store = SqliteTimerSnapshotStore::new(&bootstrap.database_path);
        let notifier = DesktopNotificationSink::detect(sound_enabled(&duration_config));

        let engine = FocusEngine::new(
            duration_config,
            Arc::new(gateway),
            Arc::new(store),
            Arc::new(notifier),
            options,
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            engine,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn engine(&self) -> &DesktopEngine {
        &self.engine
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateResponse {
    pub status: TimerStatus,
    pub phase: String,
    pub remaining_seconds: u32,
    pub target_duration_seconds: u32,
    pub progress: f64,
    pub is_running: bool,
    pub is_paused: bool,
    pub completed_focus_count: u32,
    pub linked_context_id: Option<String>,
    pub server_session_id: Option<String>,
}

pub async fn attach_impl(state: &AppState) -> TimerStateResponse {
    let timer = state.engine.on_attach().await;
    to_timer_state_response(&timer)
}

pub async fn detach_impl(state: &AppState) {
    state.engine.dispose().await;
}

pub async fn get_timer_state_impl(state: &AppState) -> TimerStateResponse {
    to_timer_state_response(&state.engine.state().await)
}

pub async fn start_focus_impl(
    state: &AppState,
    context_id: Option<String>,
    duration_minutes: Option<u32>,
) -> Result<TimerStateResponse, InfraError> {
    let timer = state.engine.start_focus(context_id, duration_minutes).await?;
    state.log_info(
        "start_focus",
        &format!(
            "started session_id={} target_seconds={}",
            timer.server_session_id.as_deref().unwrap_or("-"),
            timer.target_duration_seconds
        ),
    );
    Ok(to_timer_state_response(&timer))
}

/// With no arguments, starts the break waiting after a completed focus.
/// Otherwise starts a standalone break of the given kind and length.
pub async fn start_break_impl(
    state: &AppState,
    phase: Option<String>,
    duration_minutes: Option<u32>,
) -> Result<TimerStateResponse, InfraError> {
    let current = state.engine.state().await;
    if phase.is_none()
        && duration_minutes.is_none()
        && matches!(current.status(), TimerStatus::AwaitingPhaseTransition { .. })
    {
        let timer = state.engine.resume().await?;
        state.log_info("start_break", &format!("started pending {}", timer.phase.as_str()));
        return Ok(to_timer_state_response(&timer));
    }

    let config = state.engine.config().await;
    let phase = match phase.as_deref() {
        Some(raw) => parse_break_phase(raw)?,
        None => next_break_phase(current.completed_focus_count.max(1), &config),
    };
    let duration_minutes = duration_minutes.unwrap_or_else(|| resolve(phase, &config) / 60);

    let timer = state.engine.start_standalone(duration_minutes, phase).await?;
    state.log_info(
        "start_break",
        &format!("started {} minutes={duration_minutes}", phase.as_str()),
    );
    Ok(to_timer_state_response(&timer))
}

pub async fn pause_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let timer = state.engine.pause().await?;
    state.log_info("pause", &format!("paused remaining_seconds={}", timer.remaining_seconds));
    Ok(to_timer_state_response(&timer))
}

pub async fn resume_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let timer = state.engine.resume().await?;
    state.log_info("resume", &format!("resumed {}", timer.phase.as_str()));
    Ok(to_timer_state_response(&timer))
}

pub async fn stop_impl(state: &AppState, completed: bool) -> TimerStateResponse {
    let timer = state.engine.stop(completed).await;
    state.log_info("stop", &format!("stopped completed={completed}"));
    to_timer_state_response(&timer)
}

pub async fn skip_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let timer = state.engine.skip().await?;
    state.log_info("skip", "skipped break");
    Ok(to_timer_state_response(&timer))
}

pub async fn reset_cycle_impl(state: &AppState) -> TimerStateResponse {
    let timer = state.engine.reset_cycle().await;
    state.log_info("reset_cycle", "reset completed focus count");
    to_timer_state_response(&timer)
}

/// Replaces the timer settings in `timer.json`; absent fields fall back to
/// defaults. The gateway section is left alone.
pub async fn update_config_impl(
    state: &AppState,
    config: DurationConfig,
) -> Result<TimerStateResponse, InfraError> {
    for (field, value) in [
        ("focusMinutes", config.focus_minutes),
        ("shortBreakMinutes", config.short_break_minutes),
        ("longBreakMinutes", config.long_break_minutes),
        ("longBreakEvery", config.long_break_every),
    ] {
        if value == Some(0) {
            return Err(InfraError::InvalidConfig(format!("{field} must be > 0")));
        }
    }

    save_duration_config(&state.config_dir, &config)?;
    let merged = load_duration_config(&state.config_dir)?;
    let timer = state.engine.update_config(merged).await;
    state.log_info("update_config", "timer settings updated");
    Ok(to_timer_state_response(&timer))
}

pub fn parse_break_phase(value: &str) -> Result<TimerPhase, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "short" | "short_break" => Ok(TimerPhase::ShortBreak),
        "long" | "long_break" => Ok(TimerPhase::LongBreak),
        _ => Err(InfraError::InvalidConfig(format!(
            "unsupported break kind: {value} (expected short or long)"
        ))),
    }
}

pub fn to_timer_state_response(state: &TimerState) -> TimerStateResponse {
    TimerStateResponse {
        status: state.status(),
        phase: state.phase.as_str().to_string(),
        remaining_seconds: state.remaining_seconds,
        target_duration_seconds: state.target_duration_seconds,
        progress: state.progress(),
        is_running: state.is_running,
        is_paused: state.is_paused,
        completed_focus_count: state.completed_focus_count,
        linked_context_id: state.linked_context_id.clone(),
        server_session_id: state.server_session_id.clone(),
    }
}
