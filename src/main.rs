//! Examiner core — voice-engine process for the interview UI.
//!
//! Communicates with the UI via JSON-line IPC on stdin/stdout. This is the
//! entry point that loads configuration, wires the IPC bridge, and runs
//! the session supervisor.

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use examiner_core::config::Config;
use examiner_core::ipc::bridge::{emit_event, spawn_stdin_reader};
use examiner_core::ipc::Event;
use examiner_core::session::SpeakingSession;

#[tokio::main]
async fn main() {
    // Initialize tracing (respects RUST_LOG env, defaults to info).
    // Logs go to stderr; stdout is reserved for IPC events.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Emit starting event immediately so the UI knows we're alive.
    emit_event(&Event::Starting {});

    let config = Config::load();
    info!(
        live_model = %config.live_model,
        voice = %config.voice_name,
        has_api_key = config.api_key.is_some(),
        "Configuration loaded"
    );

    // Spawn stdin reader (blocking thread -> async channel).
    let cmd_rx = spawn_stdin_reader();

    // Session events flow through a channel to the stdout emitter so the
    // supervisor never touches stdout directly.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let emitter = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            emit_event(&event);
        }
    });

    emit_event(&Event::Ready {});
    info!("Examiner core ready");

    SpeakingSession::new(config, event_tx).run(cmd_rx).await;

    let _ = emitter.await;
    emit_event(&Event::Stopping {});
    info!("Examiner core shutting down");
}
