//! Turn-taking state machine for the conversational loop
//!
//! `Idle → Listening → Submitting → Speaking → Idle`, plus `Idle → Submitting`
//! for the synthetic opening turn. Listening and submitting are phases of one
//! enum, so they can never hold at the same time.

use crate::error::{VoiceError, VoiceResult};
use serde::Serialize;

/// Where the conversation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    Submitting,
    Speaking,
}

/// Something that happened and may move the conversation to another phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Opening turn of a fresh session is being submitted.
    SessionOpened,
    /// Capture engine started listening.
    CaptureStarted,
    /// Capture stopped with enough text to submit.
    CaptureCommitted,
    /// Capture stopped with too little text (noise).
    CaptureDiscarded,
    /// Capture engine reported an error mid-listen.
    CaptureFailed,
    /// Response finished with text to speak.
    ResponseReady,
    /// Response finished empty, or there is no way to speak it.
    ResponseEmpty,
    /// Submission failed; fallback message is in place.
    SubmissionFailed,
    /// User barged in on speech output.
    OutputInterrupted,
    /// Speech output ended or errored.
    OutputFinished,
}

impl Phase {
    /// Apply a trigger. Illegal combinations are rejected, not coerced.
    pub fn transition(self, trigger: Trigger) -> VoiceResult<Phase> {
        use Phase::*;
        use Trigger::*;

        let next = match (self, trigger) {
            (Idle, SessionOpened) => Submitting,
            (Idle, CaptureStarted) => Listening,
            (Listening, CaptureCommitted) => Submitting,
            (Listening, CaptureDiscarded) | (Listening, CaptureFailed) => Idle,
            (Submitting, ResponseReady) => Speaking,
            (Submitting, ResponseEmpty) | (Submitting, SubmissionFailed) => Idle,
            (Speaking, OutputInterrupted) | (Speaking, OutputFinished) => Idle,
            (phase, trigger) => {
                return Err(VoiceError::InvalidTransition {
                    phase: phase.as_str(),
                    trigger: trigger.as_str(),
                })
            }
        };
        Ok(next)
    }

    /// User input (capture toggles) is gated while a submission is in flight.
    pub fn accepts_input(self) -> bool {
        self != Phase::Submitting
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Submitting => "submitting",
            Phase::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::SessionOpened => "session_opened",
            Trigger::CaptureStarted => "capture_started",
            Trigger::CaptureCommitted => "capture_committed",
            Trigger::CaptureDiscarded => "capture_discarded",
            Trigger::CaptureFailed => "capture_failed",
            Trigger::ResponseReady => "response_ready",
            Trigger::ResponseEmpty => "response_empty",
            Trigger::SubmissionFailed => "submission_failed",
            Trigger::OutputInterrupted => "output_interrupted",
            Trigger::OutputFinished => "output_finished",
        }
    }
}
