//! Coach Daemon (terminal practice session)
//!
//! Runs one interview practice session against the coaching service. Typed
//! lines stand in for the microphone; replies are "spoken" on a timer, or by an
//! external TTS program when `COACH_TTS_COMMAND` is set.

mod console;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use coach_voice::{ConversationOrchestrator, EngineConfig, HttpCoachService, Role, SynthesisCapability, ROLE_CATALOG};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coach-daemon")]
#[command(version)]
#[command(about = "Voice interview practice in the terminal", long_about = None)]
struct Cli {
    /// Practice role id (see --list-roles); any other id is sent as-is
    #[arg(default_value = "general")]
    role: String,

    /// Print the built-in practice roles and exit
    #[arg(long)]
    list_roles: bool,

    /// Path to config file (overrides COACH_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without voice input
    #[arg(long)]
    no_voice_input: bool,

    /// Do not speak replies
    #[arg(long)]
    mute: bool,
}

fn pick_synthesizer(mute: bool) -> Option<SynthesisCapability> {
    if mute {
        return None;
    }
    std::env::var("COACH_TTS_COMMAND")
        .ok()
        .and_then(|command| console::command_synthesizer(&command))
        .or_else(|| Some(console::console_synthesizer()))
}

fn log_filter(rust_log: Option<String>) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(rust_log.unwrap_or_else(|| "info".into()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[coach-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(log_filter(std::env::var("RUST_LOG").ok()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if cli.list_roles {
        for entry in ROLE_CATALOG {
            println!("{:<20} {}", entry.id, entry.label);
        }
        return Ok(());
    }

    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load_from(Some(path)),
        None => EngineConfig::load(),
    }
    .context("failed to load configuration")?;
    let service = HttpCoachService::from_config(&config).context("failed to build coaching client")?;
    let role = Role::new(cli.role);

    let (capture, feeder) = if cli.no_voice_input {
        (None, None)
    } else {
        let (capability, feeder) = console::console_recognizer();
        (Some(capability), Some(feeder))
    };

    tracing::info!(
        role = %role,
        service_url = %config.service_url,
        voice_input = feeder.is_some(),
        "Coach daemon started"
    );

    let (mut orchestrator, handle) = ConversationOrchestrator::new(
        config,
        role.clone(),
        capture,
        pick_synthesizer(cli.mute),
        Arc::new(service),
    );
    let events = orchestrator
        .take_event_receiver()
        .context("session events already taken")?;
    let renderer = tokio::spawn(render::render_events(events));
    let engine = tokio::spawn(orchestrator.run());

    println!(
        "Interview practice: {}. Enter toggles the microphone, /quit ends the session.\n",
        role.label()
    );
    handle.start_session()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    tracing::info!("stdin closed; ending session");
                    break;
                };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    handle.toggle_capture()?;
                    continue;
                }
                let heard = feeder.as_ref().map(|f| f.hear(line)).unwrap_or(false);
                if !heard {
                    println!("   (press Enter on an empty line to start answering)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; ending session");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown() {
        tracing::debug!("orchestrator already stopped: {}", e);
    }
    drop(handle);
    engine.await.context("orchestrator task failed")?;
    renderer.await.context("renderer task failed")?;
    println!("\nSession ended.");
    Ok(())
}
