use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_SCHEMA: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::ShortBreak => "short_break",
            Self::LongBreak => "long_break",
        }
    }

    pub fn is_break(self) -> bool {
        matches!(self, Self::ShortBreak | Self::LongBreak)
    }
}

impl std::fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TimerPhase::Focus => "Focus",
            TimerPhase::ShortBreak => "Short break",
            TimerPhase::LongBreak => "Long break",
        };
        write!(f, "{label}")
    }
}

/// The state the engine presents to its host, derived from the raw flags of
/// [`TimerState`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TimerStatus {
    Idle,
    Running { phase: TimerPhase },
    PausedByUser { phase: TimerPhase },
    AwaitingPhaseTransition { completed: TimerPhase },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub phase: TimerPhase,
    pub remaining_seconds: u32,
    pub target_duration_seconds: u32,
    pub is_running: bool,
    pub is_paused: bool,
    pub completed_focus_count: u32,
    pub linked_context_id: Option<String>,
    pub server_session_id: Option<String>,
    /// Set while a finished Focus waits for the user to start or skip the
    /// break that follows it.
    #[serde(default)]
    pub just_completed: Option<TimerPhase>,
}

impl TimerState {
    pub fn status(&self) -> TimerStatus {
        if self.is_running {
            return TimerStatus::Running { phase: self.phase };
        }
        if let Some(completed) = self.just_completed {
            return TimerStatus::AwaitingPhaseTransition { completed };
        }
        if self.is_paused {
            return TimerStatus::PausedByUser { phase: self.phase };
        }
        TimerStatus::Idle
    }

    pub fn is_idle(&self) -> bool {
        self.status() == TimerStatus::Idle
    }

    /// Fraction of the current phase already elapsed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.target_duration_seconds == 0 {
            return 0.0;
        }
        let elapsed = self
            .target_duration_seconds
            .saturating_sub(self.remaining_seconds);
        f64::from(elapsed) / f64::from(self.target_duration_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target_duration_seconds == 0 {
            return Err("timer.target_duration_seconds must be > 0".to_string());
        }
        if self.remaining_seconds > self.target_duration_seconds {
            return Err(
                "timer.remaining_seconds must be <= timer.target_duration_seconds".to_string(),
            );
        }
        if self.is_running && self.remaining_seconds == 0 {
            return Err("a running timer must have remaining_seconds > 0".to_string());
        }
        if self.is_running && self.is_paused {
            return Err("timer cannot be running and paused at once".to_string());
        }
        if self.server_session_id.is_some() && self.phase != TimerPhase::Focus {
            return Err("timer.server_session_id is only valid during focus".to_string());
        }
        if let Some(session_id) = self.server_session_id.as_deref() {
            validate_non_empty(session_id, "timer.server_session_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerStateSnapshot {
    pub schema: u8,
    pub state: TimerState,
    pub last_persisted_at_epoch_ms: i64,
}

impl TimerStateSnapshot {
    pub fn new(state: TimerState, persisted_at: DateTime<Utc>) -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA,
            state,
            last_persisted_at_epoch_ms: persisted_at.timestamp_millis(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.schema != SNAPSHOT_SCHEMA {
            return Err(format!("unsupported snapshot schema {}", self.schema));
        }
        if self.last_persisted_at_epoch_ms < 0 {
            return Err("snapshot.last_persisted_at_epoch_ms must be >= 0".to_string());
        }
        self.state.validate()
    }

    /// Whole seconds between the snapshot write and `now`; a clock that moved
    /// backwards counts as no time passing.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        let elapsed_ms = now.timestamp_millis() - self.last_persisted_at_epoch_ms;
        if elapsed_ms <= 0 {
            return 0;
        }
        (elapsed_ms / 1000) as u64
    }

    /// Wall-clock instant the stored countdown reaches once `elapsed_seconds`
    /// of it have been applied. Unlike `now`, it keeps the sub-second part
    /// that [`Self::elapsed_seconds`] drops.
    pub fn caught_up_to(&self, elapsed_seconds: u64) -> Option<DateTime<Utc>> {
        let elapsed_ms = i64::try_from(elapsed_seconds).ok()?.checked_mul(1000)?;
        let millis = self.last_persisted_at_epoch_ms.checked_add(elapsed_ms)?;
        DateTime::from_timestamp_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub started_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub target_duration_seconds: u32,
    pub context_id: Option<String>,
}

impl ActiveSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "active_session.id")?;
        if self.target_duration_seconds == 0 {
            return Err("active_session.target_duration_seconds must be > 0".to_string());
        }
        Ok(())
    }

    /// Seconds left according to the server clock, floored at zero and capped
    /// at the session target.
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - self.started_at).num_seconds().max(0);
        let target = i64::from(self.target_duration_seconds);
        (target - elapsed).clamp(0, target) as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseCompletedEvent {
    pub completed_phase: TimerPhase,
    pub next_phase: TimerPhase,
    pub completed_focus_count: u32,
}

/// User-facing timer settings. Every field is optional; absent values are
/// resolved by [`crate::domain::duration_policy`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DurationConfig {
    pub focus_minutes: Option<u32>,
    pub short_break_minutes: Option<u32>,
    pub long_break_minutes: Option<u32>,
    pub long_break_every: Option<u32>,
    pub sound_enabled: Option<bool>,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
