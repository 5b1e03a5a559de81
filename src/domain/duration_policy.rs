use crate::domain::models::{DurationConfig, TimerPhase};

pub const DEFAULT_FOCUS_MINUTES: u32 = 25;
pub const DEFAULT_SHORT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_LONG_BREAK_MINUTES: u32 = 15;
pub const DEFAULT_LONG_BREAK_EVERY: u32 = 4;
pub const DEFAULT_SOUND_ENABLED: bool = true;

/// Full duration of `phase` in seconds. Absent or zero settings fall back to
/// the defaults.
pub fn resolve(phase: TimerPhase, config: &DurationConfig) -> u32 {
    let (configured, default) = match phase {
        TimerPhase::Focus => (config.focus_minutes, DEFAULT_FOCUS_MINUTES),
        TimerPhase::ShortBreak => (config.short_break_minutes, DEFAULT_SHORT_BREAK_MINUTES),
        TimerPhase::LongBreak => (config.long_break_minutes, DEFAULT_LONG_BREAK_MINUTES),
    };
    minutes_to_seconds(configured.filter(|minutes| *minutes > 0).unwrap_or(default))
}

pub fn minutes_to_seconds(minutes: u32) -> u32 {
    minutes.saturating_mul(60)
}

pub fn long_break_every(config: &DurationConfig) -> u32 {
    config
        .long_break_every
        .filter(|every| *every > 0)
        .unwrap_or(DEFAULT_LONG_BREAK_EVERY)
}

pub fn sound_enabled(config: &DurationConfig) -> bool {
    config.sound_enabled.unwrap_or(DEFAULT_SOUND_ENABLED)
}

/// Break that follows the Focus phase which brought the counter to
/// `completed_focus_count`.
pub fn next_break_phase(completed_focus_count: u32, config: &DurationConfig) -> TimerPhase {
    if completed_focus_count > 0 && completed_focus_count % long_break_every(config) == 0 {
        TimerPhase::LongBreak
    } else {
        TimerPhase::ShortBreak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resolve_uses_defaults_for_empty_config() {
        let config = DurationConfig::default();
        assert_eq!(resolve(TimerPhase::Focus, &config), 1_500);
        assert_eq!(resolve(TimerPhase::ShortBreak, &config), 300);
        assert_eq!(resolve(TimerPhase::LongBreak, &config), 900);
        assert!(sound_enabled(&config));
    }

    #[test]
    fn resolve_prefers_configured_values() {
        let config = DurationConfig {
            focus_minutes: Some(50),
            short_break_minutes: Some(10),
            long_break_minutes: None,
            long_break_every: None,
            sound_enabled: Some(false),
        };
        assert_eq!(resolve(TimerPhase::Focus, &config), 3_000);
        assert_eq!(resolve(TimerPhase::ShortBreak, &config), 600);
        assert_eq!(resolve(TimerPhase::LongBreak, &config), 900);
        assert!(!sound_enabled(&config));
    }

    #[test]
    fn zero_minutes_fall_back_to_default() {
        let config = DurationConfig {
            focus_minutes: Some(0),
            long_break_every: Some(0),
            ..DurationConfig::default()
        };
        assert_eq!(resolve(TimerPhase::Focus, &config), 1_500);
        assert_eq!(long_break_every(&config), 4);
    }

    #[test]
    fn custom_cadence_is_respected() {
        let config = DurationConfig {
            long_break_every: Some(2),
            ..DurationConfig::default()
        };
        assert_eq!(next_break_phase(1, &config), TimerPhase::ShortBreak);
        assert_eq!(next_break_phase(2, &config), TimerPhase::LongBreak);
        assert_eq!(next_break_phase(3, &config), TimerPhase::ShortBreak);
    }

    proptest! {
        #[test]
        fn every_fourth_focus_earns_a_long_break(count in 1u32..10_000u32) {
            let phase = next_break_phase(count, &DurationConfig::default());
            if count % 4 == 0 {
                prop_assert_eq!(phase, TimerPhase::LongBreak);
            } else {
                prop_assert_eq!(phase, TimerPhase::ShortBreak);
            }
        }
    }
}
