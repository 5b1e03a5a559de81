//! Transitions of the focus timer.
//!
//! Everything here is synchronous and free of I/O: the engine decides when to
//! call a transition, persists the result, and performs the side effects the
//! returned values ask for.

use crate::domain::duration_policy::{next_break_phase, resolve};
use crate::domain::models::{
    ActiveSession, DurationConfig, PhaseCompletedEvent, TimerPhase, TimerState,
};
use chrono::{DateTime, Utc};

/// Outcome of a phase reaching zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCompletion {
    pub completed_phase: TimerPhase,
    pub next_phase: TimerPhase,
    pub completed_focus_count: u32,
    /// Server session that must now be reported as completed.
    pub ended_session_id: Option<String>,
}

impl PhaseCompletion {
    pub fn to_event(&self) -> PhaseCompletedEvent {
        PhaseCompletedEvent {
            completed_phase: self.completed_phase,
            next_phase: self.next_phase,
            completed_focus_count: self.completed_focus_count,
        }
    }
}

impl TimerState {
    pub fn idle(config: &DurationConfig) -> Self {
        let target = resolve(TimerPhase::Focus, config);
        Self {
            phase: TimerPhase::Focus,
            remaining_seconds: target,
            target_duration_seconds: target,
            is_running: false,
            is_paused: false,
            completed_focus_count: 0,
            linked_context_id: None,
            server_session_id: None,
            just_completed: None,
        }
    }

    /// Enters `Running(phase)` with a fresh countdown.
    pub fn begin(
        &mut self,
        phase: TimerPhase,
        target_seconds: u32,
        linked_context_id: Option<String>,
        server_session_id: Option<String>,
    ) -> Result<(), String> {
        if self.is_running {
            return Err("timer is already running".to_string());
        }
        if target_seconds == 0 {
            return Err("phase duration must be > 0".to_string());
        }
        if server_session_id.is_some() && phase != TimerPhase::Focus {
            return Err("only focus phases are tracked by the server".to_string());
        }

        self.phase = phase;
        self.target_duration_seconds = target_seconds;
        self.remaining_seconds = target_seconds;
        self.is_running = true;
        self.is_paused = false;
        self.linked_context_id = linked_context_id;
        self.server_session_id = server_session_id;
        self.just_completed = None;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), String> {
        if !self.is_running {
            return Err("timer is not running".to_string());
        }
        self.is_running = false;
        self.is_paused = true;
        Ok(())
    }

    /// Continues a user pause, or starts the break that is waiting after a
    /// completed focus.
    pub fn resume(&mut self) -> Result<(), String> {
        if !self.is_paused {
            return Err("timer is not paused".to_string());
        }
        if self.remaining_seconds == 0 {
            return Err("nothing left to resume".to_string());
        }
        self.is_running = true;
        self.is_paused = false;
        self.just_completed = None;
        Ok(())
    }

    /// Back to idle focus. Returns the server session that has to be reported
    /// ended, if one was linked.
    pub fn stop(&mut self, config: &DurationConfig) -> Option<String> {
        let session_id = self.server_session_id.take();
        self.reset_to_idle(config);
        session_id
    }

    pub fn skip_break(&mut self, config: &DurationConfig) -> Result<(), String> {
        if !self.phase.is_break() {
            return Err(format!("cannot skip a {} phase", self.phase.as_str()));
        }
        if self.is_running || !self.is_paused {
            return Err("only a paused or pending break can be skipped".to_string());
        }
        self.reset_to_idle(config);
        Ok(())
    }

    /// One second of countdown.
    pub fn tick(&mut self, config: &DurationConfig) -> Option<PhaseCompletion> {
        if !self.is_running {
            return None;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            return Some(self.complete_phase(config));
        }
        None
    }

    /// Applies wall-clock time that passed while nothing was ticking. Paused
    /// and idle timers are left untouched.
    pub fn advance(
        &mut self,
        elapsed_seconds: u64,
        config: &DurationConfig,
    ) -> Option<PhaseCompletion> {
        if !self.is_running {
            return None;
        }
        if elapsed_seconds >= u64::from(self.remaining_seconds) {
            self.remaining_seconds = 0;
            return Some(self.complete_phase(config));
        }
        self.remaining_seconds -= elapsed_seconds as u32;
        None
    }

    pub fn complete_phase(&mut self, config: &DurationConfig) -> PhaseCompletion {
        let completed_phase = self.phase;
        if completed_phase == TimerPhase::Focus {
            self.completed_focus_count = self.completed_focus_count.saturating_add(1);
            let ended_session_id = self.server_session_id.take();
            let next_phase = next_break_phase(self.completed_focus_count, config);
            let target = resolve(next_phase, config);

            self.phase = next_phase;
            self.target_duration_seconds = target;
            self.remaining_seconds = target;
            self.is_running = false;
            self.is_paused = true;
            self.just_completed = Some(TimerPhase::Focus);

            return PhaseCompletion {
                completed_phase,
                next_phase,
                completed_focus_count: self.completed_focus_count,
                ended_session_id,
            };
        }

        self.reset_to_idle(config);
        PhaseCompletion {
            completed_phase,
            next_phase: TimerPhase::Focus,
            completed_focus_count: self.completed_focus_count,
            ended_session_id: None,
        }
    }

    /// Takes over a focus session the server knows about but this device does
    /// not. The countdown is rebuilt from the server's start time. Callers
    /// only adopt sessions with time left.
    pub fn adopt_session(&mut self, session: &ActiveSession, now: DateTime<Utc>) {
        let remaining = session.remaining_seconds_at(now);
        self.phase = TimerPhase::Focus;
        self.target_duration_seconds = session.target_duration_seconds;
        self.remaining_seconds = remaining;
        self.is_running = remaining > 0;
        self.is_paused = false;
        self.linked_context_id = session.context_id.clone();
        self.server_session_id = Some(session.id.clone());
        self.just_completed = None;
    }

    /// Re-reads the idle focus duration after a settings change.
    pub fn retarget_idle(&mut self, config: &DurationConfig) {
        if self.is_idle() {
            let target = resolve(TimerPhase::Focus, config);
            self.target_duration_seconds = target;
            self.remaining_seconds = target;
        }
    }

    fn reset_to_idle(&mut self, config: &DurationConfig) {
        let completed_focus_count = self.completed_focus_count;
        *self = Self::idle(config);
        self.completed_focus_count = completed_focus_count;
    }
}
