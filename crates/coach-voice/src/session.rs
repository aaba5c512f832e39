//! Session state for one practice session, and what the UI gets to see of it.
//!
//! The orchestrator owns the only `SessionState`. The UI reads cloned
//! `SessionSnapshot`s from a `watch` channel and follows `SessionEvent`s, which
//! are sent in exactly the order the state changed.

use crate::error::SubmissionFailure;
use crate::role::Role;
use crate::transcript::{Transcript, Turn};
use crate::turn::Phase;
use crate::voice_output::OutputStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// One observable state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    /// Capture started (`true`) or stopped listening.
    CaptureStatus(bool),
    /// A submission is (or is no longer) in flight.
    ProcessingStatus(bool),
    OutputStatus(OutputStatus),
    /// Live caption of the current listen.
    PartialTranscript(String),
    UserTurn(String),
    /// Empty assistant turn appended; deltas follow.
    AssistantStarted,
    AssistantDelta(String),
    /// Stream finished; carries the full assistant text.
    AssistantCompleted(String),
    /// Trailing assistant turn overwritten with the fallback message.
    AssistantReplaced(String),
    SubmissionFailed(SubmissionFailure),
    CaptureError(String),
    /// Capture was requested but the host has no recognition engine.
    CaptureUnavailable,
}

/// Read-only copy of the session for rendering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub role: Role,
    pub transcript: Vec<Turn>,
    pub phase: Phase,
    pub listening: bool,
    pub processing: bool,
    pub speaking: bool,
    pub partial: String,
    pub last_failure: Option<SubmissionFailure>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }
}

/// Mutable record of one session. Listening and processing are read off the
/// phase, so they cannot disagree with it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub role: Role,
    pub transcript: Transcript,
    pub phase: Phase,
    pub output: OutputStatus,
    pub partial: String,
    pub last_failure: Option<SubmissionFailure>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            transcript: Transcript::new(),
            phase: Phase::Idle,
            output: OutputStatus::Idle,
            partial: String::new(),
            last_failure: None,
            started_at: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.phase == Phase::Listening
    }

    pub fn is_processing(&self) -> bool {
        self.phase == Phase::Submitting
    }

    pub fn is_speaking(&self) -> bool {
        self.output == OutputStatus::Speaking
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role.clone(),
            transcript: self.transcript.turns().to_vec(),
            phase: self.phase,
            listening: self.is_listening(),
            processing: self.is_processing(),
            speaking: self.is_speaking(),
            partial: self.partial.clone(),
            last_failure: self.last_failure.clone(),
            started_at: self.started_at,
        }
    }
}

/// Fan-out to the UI: the ordered event stream and the latest snapshot.
pub(crate) struct Notifier {
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Notifier {
    pub(crate) fn new(
        state: &SessionState,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<SessionEvent>,
        watch::Receiver<SessionSnapshot>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        (
            Self {
                events: events_tx,
                snapshot: snapshot_tx,
            },
            events_rx,
            snapshot_rx,
        )
    }

    /// Nobody listening is fine; events are informational.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    pub(crate) fn has_listener(&self) -> bool {
        !self.events.is_closed()
    }

    pub(crate) fn publish(&self, state: &SessionState) {
        self.snapshot.send_replace(state.snapshot());
    }
}
