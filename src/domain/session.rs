// ============================================================
// Layer 3 — Session State Machine
// ============================================================
// The control half of a Training Session, kept free of any
// runtime or framework types so it can be tested on its own.
//
//   Idle ──start──▶ Running ◀──resume── Paused
//                    │  └────pause──────▶ │
//                    │                    └─step_once─▶ Running (one iteration)
//                    ├──▶ Completed   (loop reached max_steps)
//                    ├──▶ Error       (runtime fault)
//                    └──▶ Stopped     (stop, also from Idle / Paused)
//
// Stopped, Completed and Error are terminal: every control
// call against them is rejected, set_speed included.
//
// Control requests own `status`, `speed_multiplier` and the
// one-shot flag. The Training Loop only writes `status` for its
// own terminal transitions and for the re-pause after a step.

use serde::{Deserialize, Serialize};

// ─── SessionStatus ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle      => "idle",
            Self::Running   => "running",
            Self::Paused    => "paused",
            Self::Stopped   => "stopped",
            Self::Completed => "completed",
            Self::Error     => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── FeatureType ──────────────────────────────────────────────────────────────
/// Visualisation mode a session was created for. Does not change
/// the training math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    #[default]
    WatchLearn,
    AttentionCinema,
    StyleTransfer,
}

impl FeatureType {
    /// Unknown names fall back to `WatchLearn`.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "attention_cinema" => Self::AttentionCinema,
            "style_transfer"   => Self::StyleTransfer,
            _                  => Self::WatchLearn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WatchLearn      => "watch_learn",
            Self::AttentionCinema => "attention_cinema",
            Self::StyleTransfer   => "style_transfer",
        }
    }
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── ControlCommand ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    StepOnce,
    Stop,
}

// ─── ControlState ─────────────────────────────────────────────────────────────
/// Everything a control request may change, shared with the loop
/// through a `tokio::sync::watch` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub status:           SessionStatus,
    pub speed_multiplier: f64,
    pub step_once:        bool,
    /// A consumed one-shot step whose iteration has not re-paused yet.
    /// Any pause, resume or stop in the meantime cancels the re-pause.
    pub step_in_flight:   bool,
    /// Set on the first accepted `start`; never cleared.
    pub started:          bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            status:           SessionStatus::Idle,
            speed_multiplier: 1.0,
            step_once:        false,
            step_in_flight:   false,
            started:          false,
        }
    }
}

impl ControlState {
    /// Apply a control command. Returns `false` and leaves the
    /// state untouched when the guard rejects it.
    pub fn apply(&mut self, cmd: ControlCommand) -> bool {
        use SessionStatus::*;

        match (cmd, self.status) {
            (ControlCommand::Start, Idle) => {}
            (ControlCommand::Start, Paused) if !self.started => {}
            (ControlCommand::Pause, Running) => {}
            (ControlCommand::Resume, Paused) => {}
            (ControlCommand::StepOnce, Paused) => {}
            (ControlCommand::Stop, s) if !s.is_terminal() => {}
            _ => return false,
        }

        match cmd {
            ControlCommand::Start => {
                self.status  = Running;
                self.started = true;
            }
            ControlCommand::Pause => {
                self.status = Paused;
                self.clear_one_shot();
            }
            ControlCommand::Resume => {
                self.status = Running;
                self.clear_one_shot();
            }
            ControlCommand::StepOnce => {
                self.step_once = true;
                self.status    = Running;
            }
            ControlCommand::Stop => {
                self.status = Stopped;
                self.clear_one_shot();
            }
        }
        true
    }

    /// Clamp to `min_speed` and store. Rejected once terminal.
    pub fn set_speed(&mut self, multiplier: f64, min_speed: f64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let floor = if min_speed > 0.0 { min_speed } else { f64::MIN_POSITIVE };
        self.speed_multiplier = if multiplier.is_finite() {
            multiplier.max(floor)
        } else {
            floor
        };
        true
    }

    /// Consume the one-shot flag. Called by the loop at the top of
    /// an iteration.
    pub fn take_step_once(&mut self) -> bool {
        let taken = std::mem::take(&mut self.step_once);
        if taken {
            self.step_in_flight = true;
        }
        taken
    }

    /// Loop side: return to Paused after a one-shot iteration, unless
    /// a pause, resume or stop arrived while it ran.
    pub fn repause(&mut self) -> bool {
        let in_flight = std::mem::take(&mut self.step_in_flight);
        if in_flight && self.status == SessionStatus::Running {
            self.status = SessionStatus::Paused;
            true
        } else {
            false
        }
    }

    fn clear_one_shot(&mut self) {
        self.step_once      = false;
        self.step_in_flight = false;
    }

    /// Loop side: terminal transition on reaching max_steps. A stop
    /// that raced the last iteration wins.
    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Completed;
        true
    }

    /// Loop side: terminal transition on a runtime fault.
    pub fn fail(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Error;
        self.clear_one_shot();
        true
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ControlCommand::*;

    const ALL: [ControlCommand; 5] = [Start, Pause, Resume, StepOnce, Stop];

    fn in_status(status: SessionStatus, started: bool) -> ControlState {
        ControlState { status, started, ..Default::default() }
    }

    fn accepted(status: SessionStatus, started: bool) -> Vec<ControlCommand> {
        ALL.iter()
            .copied()
            .filter(|&cmd| in_status(status, started).apply(cmd))
            .collect()
    }

    #[test]
    fn test_idle_accepts_start_and_stop_only() {
        assert_eq!(accepted(SessionStatus::Idle, false), vec![Start, Stop]);
    }

    #[test]
    fn test_running_accepts_pause_and_stop_only() {
        assert_eq!(accepted(SessionStatus::Running, true), vec![Pause, Stop]);
    }

    #[test]
    fn test_paused_accepts_resume_step_and_stop() {
        assert_eq!(accepted(SessionStatus::Paused, true), vec![Resume, StepOnce, Stop]);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for status in [SessionStatus::Stopped, SessionStatus::Completed, SessionStatus::Error] {
            assert!(accepted(status, true).is_empty(), "{status} accepted a command");
            assert!(!in_status(status, true).set_speed(2.0, 0.1));
        }
    }

    #[test]
    fn test_start_marks_started_once() {
        let mut s = ControlState::default();
        assert!(s.apply(Start));
        assert!(s.started);
        assert!(!s.apply(Start));
        assert_eq!(s.status, SessionStatus::Running);
    }

    #[test]
    fn test_step_once_runs_then_repauses() {
        let mut s = in_status(SessionStatus::Paused, true);
        assert!(s.apply(StepOnce));
        assert_eq!(s.status, SessionStatus::Running);
        assert!(s.take_step_once());
        assert!(!s.take_step_once());
        assert!(s.repause());
        assert_eq!(s.status, SessionStatus::Paused);
    }

    #[test]
    fn test_stop_during_step_wins_over_repause() {
        let mut s = in_status(SessionStatus::Paused, true);
        s.apply(StepOnce);
        s.take_step_once();
        s.apply(Stop);
        assert!(!s.repause());
        assert_eq!(s.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_pause_before_wake_drops_pending_step() {
        let mut s = in_status(SessionStatus::Paused, true);
        assert!(s.apply(StepOnce));
        assert!(s.apply(Pause));
        assert!(s.apply(Resume));
        assert!(!s.take_step_once());
        assert!(!s.repause());
        assert_eq!(s.status, SessionStatus::Running);
    }

    #[test]
    fn test_resume_during_step_cancels_repause() {
        let mut s = in_status(SessionStatus::Paused, true);
        s.apply(StepOnce);
        assert!(s.take_step_once());
        assert!(s.apply(Pause));
        assert!(s.apply(Resume));
        assert!(!s.repause());
        assert_eq!(s.status, SessionStatus::Running);
    }

    #[test]
    fn test_stop_before_wake_drops_pending_step() {
        let mut s = in_status(SessionStatus::Paused, true);
        s.apply(StepOnce);
        assert!(s.apply(Stop));
        assert!(!s.step_once);
        assert!(!s.take_step_once());
        assert_eq!(s.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_repause_needs_a_consumed_step() {
        let mut s = in_status(SessionStatus::Running, true);
        assert!(!s.repause());
        assert_eq!(s.status, SessionStatus::Running);
    }

    #[test]
    fn test_set_speed_clamps_to_floor() {
        let mut s = ControlState::default();
        assert!(s.set_speed(0.0, 0.1));
        assert_eq!(s.speed_multiplier, 0.1);
        assert!(s.set_speed(-3.0, 0.1));
        assert_eq!(s.speed_multiplier, 0.1);
        assert!(s.set_speed(4.0, 0.1));
        assert_eq!(s.speed_multiplier, 4.0);
    }

    #[test]
    fn test_complete_does_not_override_stop() {
        let mut s = in_status(SessionStatus::Stopped, true);
        assert!(!s.complete());
        assert_eq!(s.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_unknown_feature_type_defaults() {
        assert_eq!(FeatureType::parse_or_default("nope"), FeatureType::WatchLearn);
        assert_eq!(FeatureType::parse_or_default("attention_cinema"), FeatureType::AttentionCinema);
    }
}
