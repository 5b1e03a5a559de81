use crate::domain::models::TimerPhase;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

const NOTIFICATION_TITLE: &str = "Focus";

/// Receives phase completions. Implementations are fire-and-forget: they must
/// return promptly and swallow their own failures.
pub trait NotificationSink: Send + Sync {
    fn announce_phase_complete(&self, phase: TimerPhase);
}

pub fn completion_message(phase: TimerPhase) -> &'static str {
    match phase {
        TimerPhase::Focus => "Focus session complete. Time for a break.",
        TimerPhase::ShortBreak => "Break is over. Ready for the next focus session?",
        TimerPhase::LongBreak => "Long break is over. Ready to focus again?",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyBackend {
    Osascript,
    NotifySend,
    /// Terminal output only.
    Console,
}

impl NotifyBackend {
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            return Self::Osascript;
        }
        if cfg!(target_os = "linux") && Self::command_exists("notify-send") {
            return Self::NotifySend;
        }
        Self::Console
    }

    fn command_exists(cmd: &str) -> bool {
        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn command(self, message: &str, sound: bool) -> Option<Command> {
        match self {
            Self::Osascript => {
                let mut script = format!(
                    r#"display notification "{}" with title "{}""#,
                    message.replace('"', r#"\""#),
                    NOTIFICATION_TITLE
                );
                if sound {
                    script.push_str(r#" sound name "Glass""#);
                }
                let mut command = Command::new("osascript");
                command.args(["-e", &script]);
                Some(command)
            }
            Self::NotifySend => {
                let mut command = Command::new("notify-send");
                command.args(["--app-name", "focus", NOTIFICATION_TITLE, message]);
                Some(command)
            }
            Self::Console => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DesktopNotificationSink {
    backend: NotifyBackend,
    sound_enabled: bool,
}

impl DesktopNotificationSink {
    pub fn new(backend: NotifyBackend, sound_enabled: bool) -> Self {
        Self {
            backend,
            sound_enabled,
        }
    }

    pub fn detect(sound_enabled: bool) -> Self {
        Self::new(NotifyBackend::detect(), sound_enabled)
    }

    fn ring_bell(&self) {
        let mut stderr = std::io::stderr();
        if let Err(error) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            debug!(%error, "terminal bell unavailable");
        }
    }
}

impl NotificationSink for DesktopNotificationSink {
    fn announce_phase_complete(&self, phase: TimerPhase) {
        let message = completion_message(phase);
        // osascript plays its own sound
        if self.sound_enabled && self.backend != NotifyBackend::Osascript {
            self.ring_bell();
        }

        let Some(mut command) = self.backend.command(message, self.sound_enabled) else {
            eprintln!("[{NOTIFICATION_TITLE}] {message}");
            return;
        };

        match command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(error) => warn!(%error, phase = phase.as_str(), "failed to raise notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_has_a_message() {
        for phase in [TimerPhase::Focus, TimerPhase::ShortBreak, TimerPhase::LongBreak] {
            assert!(!completion_message(phase).is_empty());
        }
    }

    #[test]
    fn console_backend_builds_no_command() {
        assert!(NotifyBackend::Console.command("done", true).is_none());
    }

    #[test]
    fn osascript_escapes_quotes() {
        let command = NotifyBackend::Osascript
            .command(r#"say "hi""#, false)
            .expect("osascript command");
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(args[0], "-e");
        assert!(args[1].contains(r#"say \"hi\""#));
        assert!(!args[1].contains("sound name"));
    }

    #[test]
    fn console_sink_never_panics() {
        let sink = DesktopNotificationSink::new(NotifyBackend::Console, false);
        sink.announce_phase_complete(TimerPhase::Focus);
    }
}
