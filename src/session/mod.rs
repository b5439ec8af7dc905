//! Session supervision: state machine, resource lifecycle, event dispatch.
//!
//! One `SpeakingSession` is live at a time. It owns the capture pipeline,
//! the playback scheduler, and the streaming session, drives the state
//! machine from a single select loop, and reports everything the UI needs
//! through an outbound event channel.

pub mod instruction;
pub mod state;
pub mod transcript;

use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::capture::{self, CaptureEvent, CapturePipeline};
use crate::audio::AudioFrame;
use crate::config::Config;
use crate::cue_card::{self, CambridgeContext, CueCard};
use crate::ipc::{Command, Event};
use crate::live::{self, InboundEvent, LiveConfig, LiveSession};
use crate::pcm;
use crate::playback::PlaybackScheduler;
use state::{SessionPhase, SessionStateMachine};
use transcript::TranscriptLog;

/// Top-level conversation supervisor.
pub struct SpeakingSession {
    config: Config,
    machine: SessionStateMachine,
    cue_card: Option<CueCard>,
    transcript: TranscriptLog,
    capture: Option<CapturePipeline>,
    scheduler: Option<PlaybackScheduler>,
    live: Option<LiveSession>,
    session_id: Option<Uuid>,
    http: reqwest::Client,
    events: UnboundedSender<Event>,
}

/// Receive on an optional channel; pends forever while the slot is empty
/// so it can sit in a select arm between sessions.
async fn recv_opt<T>(rx: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SpeakingSession {
    pub fn new(config: Config, events: UnboundedSender<Event>) -> Self {
        Self {
            config,
            machine: SessionStateMachine::new(),
            cue_card: None,
            transcript: TranscriptLog::new(),
            capture: None,
            scheduler: None,
            live: None,
            session_id: None,
            http: reqwest::Client::new(),
            events,
        }
    }

    /// Read-only view of the running transcript.
    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    fn emit(&self, event: Event) {
        // The emitter task owns the other end; if it is gone we are
        // shutting down anyway.
        let _ = self.events.send(event);
    }

    fn emit_state(&self) {
        self.emit(Event::StateChange {
            state: self.machine.phase().to_string(),
        });
    }

    /// Drive the session until the command channel closes or a shutdown
    /// command arrives.
    pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        let mut inbound: Option<UnboundedReceiver<InboundEvent>> = None;
        let mut capture_rx: Option<UnboundedReceiver<CaptureEvent>> = None;
        let mut prep = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Ping {}) => self.emit(Event::Pong {}),
                    Some(Command::FetchCueCard { book, test }) => {
                        self.fetch_cue_card(book, test).await;
                    }
                    Some(Command::StartPrep {}) => {
                        if self.start_prep() {
                            // First tick fires one second from now, not
                            // immediately.
                            prep = tokio::time::interval_at(
                                tokio::time::Instant::now() + Duration::from_secs(1),
                                Duration::from_secs(1),
                            );
                        }
                    }
                    Some(Command::Start {}) => {
                        if let Some((events_rx, frames_rx)) = self.start_session().await {
                            inbound = Some(events_rx);
                            capture_rx = Some(frames_rx);
                        }
                    }
                    Some(Command::Stop {}) => {
                        self.end_session("user stop");
                        inbound = None;
                        capture_rx = None;
                    }
                    Some(Command::Shutdown {}) | None => {
                        self.end_session("shutdown");
                        break;
                    }
                },

                event = recv_opt(&mut inbound), if inbound.is_some() => {
                    let live = match event {
                        Some(event) => self.handle_inbound(event),
                        None => {
                            self.end_session("event channel closed");
                            false
                        }
                    };
                    if !live {
                        inbound = None;
                        capture_rx = None;
                    }
                }

                event = recv_opt(&mut capture_rx), if capture_rx.is_some() => {
                    match event {
                        Some(CaptureEvent::Frame(frame)) => self.forward_frame(frame),
                        Some(CaptureEvent::DeviceLost(reason)) => {
                            self.emit(Event::Error {
                                code: "device_unavailable".to_string(),
                                message: format!("input device lost: {reason}"),
                            });
                            self.end_session("input device lost");
                            inbound = None;
                            capture_rx = None;
                        }
                        None => {} // capture closed during teardown
                    }
                }

                _ = prep.tick(), if self.machine.is_preparing() => self.tick_prep(),
            }
        }
        info!("Session supervisor stopped");
    }

    // ── Cue card & preparation ──────────────────────────────────────

    async fn fetch_cue_card(&mut self, book: Option<u32>, test: Option<u32>) {
        if self.machine.phase() != SessionPhase::Idle {
            warn!(phase = %self.machine.phase(), "Ignoring cue card request outside idle");
            return;
        }
        let context = match (book, test) {
            (Some(book), Some(test)) => Some(CambridgeContext { book, test }),
            _ => None,
        };
        match cue_card::fetch_cue_card(&self.http, &self.config, context).await {
            Ok(card) => {
                info!(topic = %card.topic, "Cue card attached");
                self.emit(Event::CueCard {
                    topic: card.topic.clone(),
                    bullet_points: card.bullet_points.clone(),
                });
                self.cue_card = Some(card);
            }
            Err(e) => {
                warn!("Cue card fetch failed: {e}");
                self.emit(Event::Error {
                    code: "cue_card".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn start_prep(&mut self) -> bool {
        if !self.machine.start_prep() {
            warn!(phase = %self.machine.phase(), "Ignoring prep request");
            return false;
        }
        self.emit_state();
        self.emit(Event::PrepTick {
            seconds_left: state::PREP_SECONDS,
        });
        true
    }

    fn tick_prep(&mut self) {
        if let Some(seconds_left) = self.machine.tick_prep() {
            self.emit(Event::PrepTick { seconds_left });
            if seconds_left == 0 {
                // Countdown finished; the user must explicitly start.
                self.emit_state();
            }
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Bring up capture, playback, and the voice channel, in that order.
    /// Returns the inbound-event and capture channels on success; on any
    /// failure every resource acquired so far is released and the machine
    /// lands back in `Idle` with the error reported.
    async fn start_session(
        &mut self,
    ) -> Option<(
        UnboundedReceiver<InboundEvent>,
        UnboundedReceiver<CaptureEvent>,
    )> {
        if !self.machine.begin_connecting() {
            warn!(phase = %self.machine.phase(), "Ignoring start request");
            return None;
        }
        self.emit_state();

        let Some(api_key) = self.config.api_key.clone() else {
            self.fail_connect("auth", "no API key configured");
            return None;
        };

        let (mut capture_pipeline, frames) =
            match capture::open(self.config.input_device.as_deref()) {
                Ok(pair) => pair,
                Err(e) => {
                    self.fail_connect("device_unavailable", &e.to_string());
                    return None;
                }
            };

        let scheduler = match PlaybackScheduler::new(self.config.output_device.as_deref()) {
            Ok(s) => s,
            Err(e) => {
                capture_pipeline.close();
                self.fail_connect("device_unavailable", &e.to_string());
                return None;
            }
        };

        let instruction = instruction::build_system_instruction(self.cue_card.as_ref());
        let live_config = LiveConfig {
            endpoint: self.config.live_endpoint.clone(),
            api_key,
            model: self.config.live_model.clone(),
            voice_name: self.config.voice_name.clone(),
        };

        match live::connect(&live_config, &instruction).await {
            Ok((session, events_rx)) => {
                let session_id = Uuid::new_v4();
                info!(session = %session_id, part_two = self.cue_card.is_some(), "Interview session active");

                // Discard audio captured during the handshake; the
                // examiner only hears what is said once the session is
                // live.
                let mut frames = frames;
                while frames.try_recv().is_ok() {}

                self.capture = Some(capture_pipeline);
                self.scheduler = Some(scheduler);
                self.live = Some(session);
                self.session_id = Some(session_id);
                self.transcript.clear();
                self.machine.connected();
                self.emit_state();
                Some((events_rx, frames))
            }
            Err(e) => {
                capture_pipeline.close();
                drop(scheduler);
                self.fail_connect(e.code(), &e.to_string());
                None
            }
        }
    }

    fn fail_connect(&mut self, code: &str, message: &str) {
        warn!(code, "Session start failed: {message}");
        self.emit(Event::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
        self.machine.connect_failed();
        self.emit_state();
    }

    /// Release everything, tolerating partial failure at each step:
    /// capture first (no more frames), then playback flush, then the
    /// network channel. Safe to call from any phase.
    fn end_session(&mut self, reason: &str) {
        if self.machine.close() {
            info!(session = ?self.session_id, reason, "Session closing");
            self.emit_state();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.close();
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.flush_all();
        }
        if let Some(live) = self.live.take() {
            live.close();
        }
        self.session_id = None;
        if self.machine.released() {
            self.emit_state();
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Route one inbound event. Returns false once the session has ended
    /// and the caller should drop its channels.
    fn handle_inbound(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::AudioSegment {
                data,
                sample_rate,
                channels,
            } => {
                match pcm::decode_pcm16(&data, channels) {
                    Ok(samples) => {
                        if let Some(scheduler) = &self.scheduler {
                            scheduler.enqueue(samples, sample_rate, channels);
                        }
                    }
                    // Corrupt segment: drop it and keep the session going.
                    Err(e) => warn!("Discarding malformed audio segment: {e}"),
                }
                true
            }
            InboundEvent::Interrupted => {
                if let Some(scheduler) = &self.scheduler {
                    scheduler.flush_all();
                }
                debug!("Playback flushed on barge-in");
                true
            }
            InboundEvent::TranscriptFragment { speaker, text } => {
                self.transcript.push(speaker, text.clone());
                self.emit(Event::Transcript {
                    speaker: speaker.to_string(),
                    text,
                });
                true
            }
            InboundEvent::Closed => {
                info!("Remote agent ended the session");
                self.end_session("remote close");
                false
            }
            InboundEvent::Error(reason) => {
                self.emit(Event::Error {
                    code: "session".to_string(),
                    message: reason.clone(),
                });
                self.end_session(&reason);
                false
            }
        }
    }

    /// Encode one capture frame and hand it to the writer. Fire-and-forget:
    /// a session that already closed swallows the frame silently.
    fn forward_frame(&self, frame: AudioFrame) {
        let Some(live) = &self.live else {
            return;
        };
        live.send_audio(pcm::encode_frame(&frame.samples, frame.sample_rate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session() -> (SpeakingSession, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SpeakingSession::new(Config::default(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_start_without_api_key_lands_back_in_idle() {
        let (mut session, mut rx) = session();
        assert!(session.start_session().await.is_none());
        assert_eq!(session.phase(), SessionPhase::Idle);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Error { code, .. } if code == "auth"
        )));
        // connecting -> error -> idle
        assert!(matches!(
            events.last(),
            Some(Event::StateChange { state }) if state == "idle"
        ));
    }

    #[tokio::test]
    async fn test_prep_flow_emits_ticks() {
        let (mut session, mut rx) = session();
        assert!(session.start_prep());
        for _ in 0..state::PREP_SECONDS {
            session.tick_prep();
        }
        assert_eq!(session.phase(), SessionPhase::Idle);

        let events = drain(&mut rx);
        let ticks: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::PrepTick { seconds_left } => Some(*seconds_left),
                _ => None,
            })
            .collect();
        assert_eq!(ticks.first(), Some(&state::PREP_SECONDS));
        assert_eq!(ticks.last(), Some(&0));
        assert_eq!(ticks.len() as u32, state::PREP_SECONDS + 1);
    }

    #[tokio::test]
    async fn test_transcript_fragments_append_in_order() {
        let (mut session, mut rx) = session();
        session.machine.begin_connecting();
        session.machine.connected();

        assert!(session.handle_inbound(InboundEvent::TranscriptFragment {
            speaker: live::Speaker::Examiner,
            text: "Good morning.".to_string(),
        }));
        assert!(session.handle_inbound(InboundEvent::TranscriptFragment {
            speaker: live::Speaker::Candidate,
            text: "Good morning!".to_string(),
        }));

        assert_eq!(session.transcript().len(), 2);
        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            Event::Transcript { speaker, .. } if speaker == "Examiner"
        ));
        assert!(matches!(
            &events[1],
            Event::Transcript { speaker, .. } if speaker == "You"
        ));
    }

    #[tokio::test]
    async fn test_remote_close_releases_and_returns_to_idle() {
        let (mut session, mut rx) = session();
        session.machine.begin_connecting();
        session.machine.connected();

        assert!(!session.handle_inbound(InboundEvent::Closed));
        assert_eq!(session.phase(), SessionPhase::Idle);

        let states: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChange { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec!["closed".to_string(), "idle".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_segment_does_not_end_session() {
        let (mut session, _rx) = session();
        session.machine.begin_connecting();
        session.machine.connected();

        // Odd byte count: decode fails, session continues.
        assert!(session.handle_inbound(InboundEvent::AudioSegment {
            data: vec![0x01, 0x02, 0x03],
            sample_rate: 24_000,
            channels: 1,
        }));
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_mid_session_error_is_surfaced_and_fatal() {
        let (mut session, mut rx) = session();
        session.machine.begin_connecting();
        session.machine.connected();

        assert!(!session.handle_inbound(InboundEvent::Error("socket reset".to_string())));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            Event::Error { code, message } if code == "session" && message == "socket reset"
        )));
    }

    #[tokio::test]
    async fn test_entity_not_found_connect_failure_lands_in_idle() {
        let (mut session, mut rx) = session();
        session.machine.begin_connecting();
        session.fail_connect("entity_not_found", "Requested entity was not found");
        assert_eq!(session.phase(), SessionPhase::Idle);

        // The distinguished code reaches the UI, not a generic one.
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            Event::Error { code, .. } if code == "entity_not_found"
        )));
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let (mut session, _rx) = session();
        session.end_session("nothing running");
        assert_eq!(session.phase(), SessionPhase::Idle);
        session.machine.begin_connecting();
        session.end_session("cancel connecting");
        session.end_session("again");
        assert_eq!(session.phase(), SessionPhase::Idle);
    }
}
