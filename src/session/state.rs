//! Conversation-level session state machine.
//!
//! Tracks where the interview is: idle, counting down cue-card preparation
//! time, connecting, live, or tearing down. Transition methods return
//! whether the transition was taken so callers can ignore stale requests.

/// Cue-card preparation time, matching the real test's one minute.
pub const PREP_SECONDS: u32 = 60;

/// Conversation phase. Only one of `Preparing`, `Connecting`, `Active`
/// may be live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Preparing { seconds_left: u32 },
    Connecting,
    Active,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Preparing { .. } => write!(f, "preparing"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug)]
pub struct SessionStateMachine {
    phase: SessionPhase,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_preparing(&self) -> bool {
        matches!(self.phase, SessionPhase::Preparing { .. })
    }

    /// Begin the preparation countdown. Only valid from `Idle`; the user
    /// must explicitly start the session afterwards.
    pub fn start_prep(&mut self) -> bool {
        if self.phase != SessionPhase::Idle {
            return false;
        }
        self.phase = SessionPhase::Preparing {
            seconds_left: PREP_SECONDS,
        };
        true
    }

    /// Advance the countdown by one second. Returns the remaining seconds,
    /// or `None` when no countdown is running. Hitting zero returns to
    /// `Idle`, never directly to `Active`.
    pub fn tick_prep(&mut self) -> Option<u32> {
        match self.phase {
            SessionPhase::Preparing { seconds_left } if seconds_left > 1 => {
                self.phase = SessionPhase::Preparing {
                    seconds_left: seconds_left - 1,
                };
                Some(seconds_left - 1)
            }
            SessionPhase::Preparing { .. } => {
                self.phase = SessionPhase::Idle;
                Some(0)
            }
            _ => None,
        }
    }

    /// Start connecting. Valid from `Idle`, or from `Preparing` — which
    /// cancels the countdown.
    pub fn begin_connecting(&mut self) -> bool {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Preparing { .. } => {
                self.phase = SessionPhase::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Handshake succeeded.
    pub fn connected(&mut self) -> bool {
        if self.phase != SessionPhase::Connecting {
            return false;
        }
        self.phase = SessionPhase::Active;
        true
    }

    /// Handshake failed; the error is surfaced separately.
    pub fn connect_failed(&mut self) -> bool {
        if self.phase != SessionPhase::Connecting {
            return false;
        }
        self.phase = SessionPhase::Idle;
        true
    }

    /// User stop, remote close, or fatal error. Also usable to cancel out
    /// of `Connecting` at any time.
    pub fn close(&mut self) -> bool {
        match self.phase {
            SessionPhase::Connecting | SessionPhase::Active => {
                self.phase = SessionPhase::Closed;
                true
            }
            _ => false,
        }
    }

    /// All resources released; back to `Idle`.
    pub fn released(&mut self) -> bool {
        if self.phase != SessionPhase::Closed {
            return false;
        }
        self.phase = SessionPhase::Idle;
        true
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prep_counts_down_to_idle_without_activating() {
        let mut machine = SessionStateMachine::new();
        assert!(machine.start_prep());
        assert_eq!(
            machine.phase(),
            SessionPhase::Preparing {
                seconds_left: PREP_SECONDS
            }
        );

        for _ in 0..PREP_SECONDS {
            assert_ne!(machine.phase(), SessionPhase::Active);
            assert!(machine.tick_prep().is_some());
        }
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert_eq!(machine.tick_prep(), None);
    }

    #[test]
    fn test_start_during_prep_cancels_countdown() {
        let mut machine = SessionStateMachine::new();
        machine.start_prep();
        machine.tick_prep();
        assert!(machine.begin_connecting());
        assert_eq!(machine.phase(), SessionPhase::Connecting);
        // The countdown is gone.
        assert_eq!(machine.tick_prep(), None);
    }

    #[test]
    fn test_start_prep_only_from_idle() {
        let mut machine = SessionStateMachine::new();
        machine.begin_connecting();
        assert!(!machine.start_prep());
        machine.connected();
        assert!(!machine.start_prep());
    }

    #[test]
    fn test_connect_failure_returns_to_idle() {
        let mut machine = SessionStateMachine::new();
        assert!(machine.begin_connecting());
        assert!(machine.connect_failed());
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_full_session_lifecycle() {
        let mut machine = SessionStateMachine::new();
        assert!(machine.begin_connecting());
        assert!(machine.connected());
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert!(machine.close());
        assert_eq!(machine.phase(), SessionPhase::Closed);
        assert!(machine.released());
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_cancel_out_of_connecting() {
        let mut machine = SessionStateMachine::new();
        machine.begin_connecting();
        assert!(machine.close());
        assert!(machine.released());
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_stale_transitions_are_rejected() {
        let mut machine = SessionStateMachine::new();
        assert!(!machine.connected());
        assert!(!machine.connect_failed());
        assert!(!machine.close());
        assert!(!machine.released());
    }
}
