//! Error types for the coach voice engine

use serde::Serialize;
use thiserror::Error;

/// Result type alias for voice engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice conversation engine
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Speech capture is not available on this host")]
    CaptureUnavailable,

    #[error("Speech output is not available on this host")]
    OutputUnavailable,

    #[error("Capture engine error: {0}")]
    Capture(String),

    #[error("Synthesis engine error: {0}")]
    Synthesis(String),

    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionFailure),

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("Invalid transition: {trigger} while {phase}")]
    InvalidTransition {
        phase: &'static str,
        trigger: &'static str,
    },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Why a submission to the coaching service failed.
///
/// Every variant is recovered the same way (fallback message, back to idle);
/// the rate and usage limits keep their own wording so a UI can show it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SubmissionFailure {
    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,

    #[error("Usage limit reached. Please add credits to continue.")]
    UsageLimited,

    #[error("Request failed: {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No response body")]
    MissingBody,

    #[error("Stream error: {0}")]
    Stream(String),
}

impl SubmissionFailure {
    /// Map a non-success HTTP status to a failure.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => SubmissionFailure::RateLimited,
            402 => SubmissionFailure::UsageLimited,
            other => SubmissionFailure::Status(other),
        }
    }

    /// True for the rate/usage limits that deserve a distinct user message.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            SubmissionFailure::RateLimited | SubmissionFailure::UsageLimited
        )
    }
}

impl From<reqwest::Error> for SubmissionFailure {
    fn from(err: reqwest::Error) -> Self {
        SubmissionFailure::Network(err.to_string())
    }
}

/// Precondition violations of the transcript store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("an assistant turn is already in progress")]
    TurnInProgress,

    #[error("the last turn is not an assistant turn")]
    NoAssistantTurn,
}
