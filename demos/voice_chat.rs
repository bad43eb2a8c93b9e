//! Voice chat example.
//!
//! Talks to the live model through the default microphone and speaker.
//! Type `m` + Enter to toggle mute, `r` + Enter to reconnect after an error,
//! and press Ctrl-C to hang up.
//!
//! # Usage
//!
//! ```bash
//! LIVE_VOICE_API_KEY=... RUST_LOG=live_voice=info cargo run --example voice_chat
//! ```

use live_voice::capture::list_input_devices;
use live_voice::playback::list_output_devices;
use live_voice::{SessionConfig, SessionEvent, SessionState, VoiceSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Live Voice Chat ===");
    println!();
    if let Ok(devices) = list_input_devices() {
        println!("Inputs:  {}", devices.join(", "));
    }
    if let Ok(devices) = list_output_devices() {
        println!("Outputs: {}", devices.join(", "));
    }

    let config = SessionConfig::from_env();
    if config.api_key.is_none() {
        eprintln!("LIVE_VOICE_API_KEY is not set; the service will likely refuse the connection.");
    }

    let controller = VoiceSession::builder()
        .config(config)
        .system_instruction("You are a friendly voice assistant. Keep answers short.")
        .on_event(|event| match event {
            SessionEvent::Degraded { dropped_total, .. } => {
                eprintln!("[Warning] Network slow: {dropped_total} frames dropped");
            }
            SessionEvent::Interrupted { discarded_buffers } => {
                println!("[Event] Interrupted ({discarded_buffers} buffers cut)");
            }
            SessionEvent::TurnComplete => println!("[Event] Turn complete"),
            SessionEvent::StateChanged { to, .. } => println!("[State] {}", to.label()),
            _ => {}
        })
        .build()?;

    if let Err(e) = controller.open().await {
        eprintln!("Could not start: {e}");
        if let Some(message) = controller.error_message() {
            eprintln!("{message}");
        }
        return Ok(());
    }
    println!("Talking... (m = mute, r = reconnect, Ctrl-C = quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line?.as_deref().map(str::trim) {
                Some("m") => match controller.toggle_mute().await {
                    Ok(true) => println!("Muted"),
                    Ok(false) => println!("Unmuted"),
                    Err(e) => eprintln!("{e}"),
                },
                Some("r") => {
                    if let Err(e) = controller.reconnect().await {
                        eprintln!("Reconnect failed: {e}");
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    let stats = controller.stats();
    controller.close().await;
    if let SessionState::Failed(kind) = controller.state() {
        eprintln!("Session ended with an error: {}", kind.user_message());
    }

    println!();
    println!("Stats:");
    println!("  Frames sent:     {}", stats.frames_sent);
    println!("  Frames dropped:  {}", stats.packets_dropped);
    println!("  Chunks played:   {}", stats.chunks_played);
    println!("  Interruptions:   {}", stats.interruptions);

    Ok(())
}
