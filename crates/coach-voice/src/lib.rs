//! # Coach Voice - Interview Practice Conversation Engine
//!
//! Turns a spoken answer into a coaching turn and speaks the streamed feedback
//! back, one race-free turn at a time. Speech engines are host capabilities
//! behind small traits; a host without one gets the degraded path, not an error.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Conversation Orchestrator                    │
//! │   Idle → Listening → Submitting → Speaking → Idle            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ Speech       │→ │  Transcript  │→ │  Streaming   │        │
//! │  │ Capture      │  │    Store     │  │  Consumer    │→ POST  │
//! │  │ (STT engine) │  └──────────────┘  │ (SSE deltas) │  SSE   │
//! │  └──────────────┘         ↑          └──────────────┘        │
//! │         ↑ barge-in        └──────── deltas ───┘              │
//! │  ┌──────────────┐                                            │
//! │  │ Speech Output│← completed assistant turn                  │
//! │  │ (TTS engine) │                                            │
//! │  └──────────────┘                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The UI talks to the engine through an [`OrchestratorHandle`]: two commands
//! (`start_session`, `toggle_capture`), a snapshot, and an ordered stream of
//! [`SessionEvent`]s.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod role;
pub mod service;
pub mod session;
pub mod stream;
pub mod stt;
pub mod transcript;
pub mod turn;
pub mod voice_output;

pub use config::{EngineConfig, VoiceConfig};
pub use error::{SubmissionFailure, TranscriptError, VoiceError, VoiceResult};
pub use orchestrator::{Command, ConversationOrchestrator, OrchestratorHandle};
pub use role::{Role, RoleEntry, ROLE_CATALOG};
pub use service::{
    ByteStream, CoachRequest, CoachService, HttpCoachService, ScriptedCoachService, ScriptedResponse,
};
pub use session::{SessionEvent, SessionSnapshot, SessionState};
pub use stream::{consume, decode_frame, Frame, SseDecoder, StreamingResponseConsumer};
pub use stt::{
    best_hypothesis, CaptureCapability, CaptureUpdate, RecognitionEngine, RecognitionEvent,
    RecognitionResult, RecognitionSettings, RecognizerControl, ScriptedRecognizer, SpeechCaptureAdapter,
};
pub use transcript::{DeltaSink, Speaker, Transcript, Turn};
pub use turn::{Phase, Trigger};
pub use voice_output::{
    select_voice, OutputStatus, OutputUpdate, ScriptedSynthesizer, SpeechOutputAdapter, SynthesisCapability,
    SynthesisEngine, SynthesisEvent, SynthesizerControl, Utterance, UtteranceId, VoiceInfo,
};
