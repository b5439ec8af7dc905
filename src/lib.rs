//! Examiner core — real-time voice engine for a spoken-interview practice app.
//!
//! Captures microphone audio at 16 kHz mono, streams it as base64 PCM16 over
//! a full-duplex channel to a remote examiner agent, plays the synthesized
//! replies back gaplessly with barge-in support, and supervises the
//! conversation state machine. The UI lives in a separate process and talks
//! to this core over JSON-line IPC (commands on stdin, events on stdout).

pub mod audio;
pub mod config;
pub mod cue_card;
pub mod ipc;
pub mod live;
pub mod pcm;
pub mod playback;
pub mod session;
