//! IPC protocol types for communication with the interview UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> UI).
//! Commands use `{"command": "<name>", ...}` format (UI -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Events: core -> UI (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the UI via stdout as JSON lines.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Starting {},
    Ready {},
    /// Session phase changed: idle, preparing, connecting, active, closed.
    StateChange { state: String },
    /// One second of cue-card preparation time elapsed.
    PrepTick { seconds_left: u32 },
    /// A fresh Part 2 cue card is attached to the session.
    CueCard {
        topic: String,
        bullet_points: Vec<String>,
    },
    /// One transcript fragment, in arrival order.
    Transcript { speaker: String, text: String },
    Error { code: String, message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: UI -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the UI via stdin as JSON lines.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Fetch a new cue card, optionally pinned to a Cambridge book/test.
    FetchCueCard {
        #[serde(default)]
        book: Option<u32>,
        #[serde(default)]
        test: Option<u32>,
    },
    /// Begin the one-minute preparation countdown.
    StartPrep {},
    /// Start the interview session.
    Start {},
    /// Stop the interview session.
    Stop {},
    Ping {},
    /// Exit the core process.
    Shutdown {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let cmd: Command = serde_json::from_str(r#"{"command": "start"}"#).unwrap();
        assert!(matches!(cmd, Command::Start {}));

        let cmd: Command =
            serde_json::from_str(r#"{"command": "fetch_cue_card", "book": 17, "test": 3}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            Command::FetchCueCard {
                book: Some(17),
                test: Some(3)
            }
        ));

        let cmd: Command = serde_json::from_str(r#"{"command": "fetch_cue_card"}"#).unwrap();
        assert!(matches!(
            cmd,
            Command::FetchCueCard {
                book: None,
                test: None
            }
        ));
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        assert!(serde_json::from_str::<Command>(r#"{"command": "reboot"}"#).is_err());
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(Event::StateChange {
            state: "active".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "state_change");
        assert_eq!(json["data"]["state"], "active");

        let json = serde_json::to_value(Event::PrepTick { seconds_left: 42 }).unwrap();
        assert_eq!(json["event"], "prep_tick");
        assert_eq!(json["data"]["seconds_left"], 42);
    }
}
