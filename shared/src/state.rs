//! Match lifecycle vocabulary shared with the game-rules module
//!
//! ```text
//! Start -> (ready handshake) -> Resume -> Play <-> Pause
//!                                          |
//!                              PointLost(L|R) -> Resume | MatchOver -> Start
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchState {
    /// Waiting for players, nothing in play
    #[default]
    Start,
    /// Countdown before the ball is served
    Resume,
    Play,
    Pause,
    /// The left player missed the ball
    PointLostLeft,
    /// The right player missed the ball
    PointLostRight,
    MatchOver,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Start => "Start",
            MatchState::Resume => "Resume",
            MatchState::Play => "Play",
            MatchState::Pause => "Pause",
            MatchState::PointLostLeft => "PointLostLeft",
            MatchState::PointLostRight => "PointLostRight",
            MatchState::MatchOver => "MatchOver",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Start" => Some(MatchState::Start),
            "Resume" => Some(MatchState::Resume),
            "Play" => Some(MatchState::Play),
            "Pause" => Some(MatchState::Pause),
            "PointLostLeft" => Some(MatchState::PointLostLeft),
            "PointLostRight" => Some(MatchState::PointLostRight),
            "MatchOver" => Some(MatchState::MatchOver),
            _ => None,
        }
    }

    /// Whether the authoritative peer may move from `self` to `next`.
    ///
    /// Resetting to `Start` is always allowed; it is how a lost peer or a
    /// finished match brings both sides back to the lobby.
    pub fn can_transition_to(&self, next: MatchState) -> bool {
        use MatchState::*;

        if next == Start {
            return true;
        }
        match self {
            Start => matches!(next, Resume | Pause),
            Resume => matches!(next, Play | Pause),
            Play => matches!(next, Pause | PointLostLeft | PointLostRight),
            Pause => matches!(next, Play | Resume),
            PointLostLeft | PointLostRight => matches!(next, Resume | MatchOver),
            MatchOver => false,
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MatchState; 7] = [
        MatchState::Start,
        MatchState::Resume,
        MatchState::Play,
        MatchState::Pause,
        MatchState::PointLostLeft,
        MatchState::PointLostRight,
        MatchState::MatchOver,
    ];

    #[test]
    fn test_names_match_serde() {
        for state in ALL {
            assert_eq!(MatchState::from_name(state.as_str()), Some(state));
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(state.as_str().to_string())
            );
        }
        assert_eq!(MatchState::from_name("PlayGame"), None);
    }

    #[test]
    fn test_default_is_start() {
        assert_eq!(MatchState::default(), MatchState::Start);
    }

    #[test]
    fn test_every_state_can_reset() {
        for state in ALL {
            assert!(state.can_transition_to(MatchState::Start));
        }
    }

    #[test]
    fn test_match_lifecycle_path() {
        let path = [
            MatchState::Start,
            MatchState::Resume,
            MatchState::Play,
            MatchState::Pause,
            MatchState::Play,
            MatchState::PointLostRight,
            MatchState::Resume,
            MatchState::Play,
            MatchState::PointLostLeft,
            MatchState::MatchOver,
            MatchState::Start,
        ];

        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!MatchState::Start.can_transition_to(MatchState::Play));
        assert!(!MatchState::Start.can_transition_to(MatchState::MatchOver));
        assert!(!MatchState::Resume.can_transition_to(MatchState::PointLostLeft));
        assert!(!MatchState::MatchOver.can_transition_to(MatchState::Resume));
        assert!(!MatchState::PointLostLeft.can_transition_to(MatchState::Play));
    }
}
