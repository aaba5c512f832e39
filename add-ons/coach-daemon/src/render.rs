//! Session events as terminal output.

use coach_voice::{OutputStatus, SessionEvent};
use std::io::Write;
use tokio::sync::mpsc;

/// Text to print for one event, if any. Assistant text streams inline, so
/// deltas carry no newline.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::CaptureStatus(true) => {
            Some("🎙  Listening... type your answer, then press Enter on an empty line.\n".to_string())
        }
        SessionEvent::ProcessingStatus(true) => Some("   (thinking...)\n".to_string()),
        SessionEvent::OutputStatus(OutputStatus::Speaking) => {
            Some("🔊 Speaking. Press Enter to interrupt and answer.\n".to_string())
        }
        SessionEvent::PartialTranscript(text) if !text.is_empty() => Some(format!("   … {}\n", text)),
        SessionEvent::UserTurn(text) => Some(format!("\nYou: {}\n", text)),
        SessionEvent::AssistantStarted => Some("Coach: ".to_string()),
        SessionEvent::AssistantDelta(delta) => Some(delta.clone()),
        SessionEvent::AssistantCompleted(_) => Some("\n".to_string()),
        SessionEvent::AssistantReplaced(text) => Some(format!("\nCoach: {}\n", text)),
        SessionEvent::SubmissionFailed(failure) if failure.is_limit() => Some(format!("⚠  {}\n", failure)),
        SessionEvent::SubmissionFailed(failure) => Some(format!("⚠  Request failed: {}\n", failure)),
        SessionEvent::CaptureError(message) => Some(format!("⚠  Speech recognition error: {}\n", message)),
        SessionEvent::CaptureUnavailable => {
            Some("⚠  Voice input is not available. Restart without --no-voice-input.\n".to_string())
        }
        _ => None,
    }
}

/// Print events until the orchestrator goes away.
pub async fn render_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        tracing::trace!(?event, "Render: event");
        if let Some(text) = render(&event) {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}
