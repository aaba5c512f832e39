//! Conversation Orchestrator - the turn-taking loop
//!
//! One tokio task owns the session. Commands from the UI, recognition events
//! and synthesis events reach it over channels and are handled one at a time,
//! so no two handlers ever interleave. The only suspension points are the next
//! engine event and, while submitting, the next chunk of the response stream.

use crate::config::EngineConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::role::Role;
use crate::service::{CoachRequest, CoachService};
use crate::session::{Notifier, SessionEvent, SessionSnapshot, SessionState};
use crate::stream::StreamingResponseConsumer;
use crate::stt::{CaptureCapability, CaptureUpdate, RecognitionEvent, SpeechCaptureAdapter};
use crate::transcript::DeltaSink;
use crate::turn::{Phase, Trigger};
use crate::voice_output::{
    OutputStatus, OutputUpdate, SpeechOutputAdapter, SynthesisCapability, SynthesisEvent,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What the UI may ask of a running orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartSession,
    ToggleCapture,
    Shutdown,
}

/// Cloneable UI-side handle. When every handle is gone the orchestrator tears down.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl OrchestratorHandle {
    /// Begin the session with the opening turn. Only the first call does anything.
    pub fn start_session(&self) -> VoiceResult<()> {
        self.send(Command::StartSession)
    }

    /// Start listening (interrupting speech output), or stop and submit.
    pub fn toggle_capture(&self) -> VoiceResult<()> {
        self.send(Command::ToggleCapture)
    }

    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(Command::Shutdown)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|e| VoiceError::ChannelClosed(format!("orchestrator stopped, {:?} dropped", e.0)))
    }
}

/// Everything the run loop can wake up for.
enum Event {
    Command(Command),
    HandlesDropped,
    Capture(RecognitionEvent),
    Output(SynthesisEvent),
}

/// Streams deltas into the session transcript and tells the UI about each one.
struct LiveTranscript<'a> {
    state: &'a mut SessionState,
    notifier: &'a Notifier,
}

impl DeltaSink for LiveTranscript<'_> {
    fn append_delta(&mut self, delta: &str) {
        self.state.transcript.append_delta(delta);
        self.notifier.emit(SessionEvent::AssistantDelta(delta.to_string()));
        self.notifier.publish(self.state);
    }
}

/// The voice conversation engine for one practice session.
pub struct ConversationOrchestrator {
    config: EngineConfig,
    state: SessionState,
    capture: SpeechCaptureAdapter,
    output: SpeechOutputAdapter,
    consumer: StreamingResponseConsumer,
    commands: mpsc::UnboundedReceiver<Command>,
    notifier: Notifier,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    torn_down: bool,
}

impl ConversationOrchestrator {
    /// Build the engine from whatever capabilities the host has. Missing engines
    /// select the degraded paths; nothing here fails.
    pub fn new(
        config: EngineConfig,
        role: Role,
        capture: Option<CaptureCapability>,
        synthesis: Option<SynthesisCapability>,
        service: Arc<dyn CoachService>,
    ) -> (Self, OrchestratorHandle) {
        info!(role = %role, "🎭 Orchestrator: initializing");

        let capture = SpeechCaptureAdapter::probe(capture, &config.capture_locale);
        let output = SpeechOutputAdapter::probe(synthesis, config.voice.clone());
        let state = SessionState::new(role);
        let (notifier, event_rx, snapshot_rx) = Notifier::new(&state);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            config,
            state,
            capture,
            output,
            consumer: StreamingResponseConsumer::new(service),
            commands: commands_rx,
            notifier,
            event_rx: Some(event_rx),
            torn_down: false,
        };
        let handle = OrchestratorHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };
        (orchestrator, handle)
    }

    /// Take the session event stream. Can only be taken once.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    /// Drive the session until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("🚀 Orchestrator: running");
        self.release_unclaimed_events();
        loop {
            let event = tokio::select! {
                biased;
                event = self.capture.next_event() => Event::Capture(event),
                event = self.output.next_event() => Event::Output(event),
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::HandlesDropped,
                },
            };

            let keep_running = match event {
                Event::Command(Command::StartSession) => self.start_session().await,
                Event::Command(Command::ToggleCapture) => self.toggle_capture().await,
                Event::Command(Command::Shutdown) => {
                    info!("Orchestrator: shutdown requested");
                    false
                }
                Event::HandlesDropped => {
                    info!("Orchestrator: all handles dropped");
                    false
                }
                Event::Capture(event) => {
                    self.on_capture_event(event);
                    true
                }
                Event::Output(event) => {
                    self.on_output_event(event);
                    true
                }
            };
            if !keep_running {
                break;
            }
        }
        self.teardown();
    }

    /// Close the event stream if nobody took it, so events are dropped instead of queued.
    fn release_unclaimed_events(&mut self) {
        if self.event_rx.take().is_some() {
            debug!("Orchestrator: session events not taken, publishing snapshots only");
        }
    }

    async fn start_session(&mut self) -> bool {
        if self.state.is_started() {
            debug!("Orchestrator: session already started, ignoring");
            return true;
        }
        if self.state.phase != Phase::Idle {
            warn!(phase = %self.state.phase, "Orchestrator: cannot start session now");
            return true;
        }
        self.state.started_at = Some(Utc::now());
        info!(role = %self.state.role, "Orchestrator: session started");
        let opening = self.config.opening_message.clone();
        self.submit(opening, Trigger::SessionOpened).await
    }

    async fn toggle_capture(&mut self) -> bool {
        if !self.state.is_started() {
            debug!("Orchestrator: capture toggled before session start, ignoring");
            return true;
        }
        if self.state.phase == Phase::Speaking {
            // Output must read idle before capture reads listening.
            self.interrupt_output();
        }
        if !self.capture.is_available() {
            warn!("Orchestrator: speech capture unavailable");
            self.notifier.emit(SessionEvent::CaptureUnavailable);
            return true;
        }
        match self.state.phase {
            Phase::Idle => {
                self.begin_capture();
                true
            }
            Phase::Listening => self.finish_capture().await,
            Phase::Submitting | Phase::Speaking => {
                debug!(phase = %self.state.phase, "Orchestrator: toggle ignored");
                true
            }
        }
    }

    fn interrupt_output(&mut self) {
        info!("Orchestrator: barge-in, cancelling speech output");
        if self.output.cancel() {
            self.set_output_status(OutputStatus::Idle);
        }
        self.apply(Trigger::OutputInterrupted);
    }

    fn begin_capture(&mut self) {
        match self.capture.start() {
            Ok(()) => {
                self.state.partial.clear();
                self.apply(Trigger::CaptureStarted);
            }
            Err(VoiceError::CaptureUnavailable) => {
                self.notifier.emit(SessionEvent::CaptureUnavailable);
            }
            Err(e) => {
                warn!("Orchestrator: capture failed to start: {}", e);
                self.notifier.emit(SessionEvent::CaptureError(e.to_string()));
                self.publish();
            }
        }
    }

    async fn finish_capture(&mut self) -> bool {
        let captured = self.capture.stop();
        self.state.partial.clear();
        let text = captured.trim();

        if text.chars().count() > self.config.min_utterance_chars {
            let text = text.to_string();
            self.submit(text, Trigger::CaptureCommitted).await
        } else {
            debug!(chars = text.chars().count(), "Orchestrator: capture too short, discarding");
            self.apply(Trigger::CaptureDiscarded);
            true
        }
    }

    /// Append `text` as the user turn and stream the reply. Returns false when
    /// shutdown arrived mid-submission.
    async fn submit(&mut self, text: String, trigger: Trigger) -> bool {
        if !self.apply(trigger) {
            return true;
        }
        self.state.last_failure = None;
        if self.state.transcript.append_user(&text) {
            self.notifier.emit(SessionEvent::UserTurn(text));
        }
        if let Err(e) = self.state.transcript.append_assistant_placeholder() {
            warn!("Orchestrator: {}", e);
        } else {
            self.notifier.emit(SessionEvent::AssistantStarted);
        }
        self.publish();

        let request = CoachRequest::new(self.state.transcript.request_turns(), &self.state.role);
        let consumer = self.consumer.clone();

        let outcome = {
            let mut sink = LiveTranscript {
                state: &mut self.state,
                notifier: &self.notifier,
            };
            let submission = consumer.submit(request, &mut sink);
            tokio::pin!(submission);

            loop {
                tokio::select! {
                    outcome = &mut submission => break Some(outcome),
                    command = self.commands.recv() => match command {
                        Some(Command::Shutdown) | None => break None,
                        Some(other) => debug!(?other, "Orchestrator: ignored while submitting"),
                    },
                }
            }
        };

        let Some(outcome) = outcome else {
            info!("Orchestrator: shutting down mid-submission");
            return false;
        };
        self.state.transcript.complete_assistant();

        match outcome {
            Ok(reply) => {
                self.notifier.emit(SessionEvent::AssistantCompleted(reply.clone()));
                self.respond(&reply);
            }
            Err(failure) => {
                warn!(%failure, "Orchestrator: submission failed, falling back");
                let fallback = self.config.fallback_message.clone();
                if let Err(e) = self.state.transcript.replace_last_assistant(&fallback) {
                    warn!("Orchestrator: {}", e);
                }
                self.state.last_failure = Some(failure.clone());
                self.notifier.emit(SessionEvent::SubmissionFailed(failure));
                self.notifier.emit(SessionEvent::AssistantReplaced(fallback));
                self.apply(Trigger::SubmissionFailed);
            }
        }
        true
    }

    /// Speak a completed reply, or go straight back to idle when there is
    /// nothing to say or no way to say it.
    fn respond(&mut self, reply: &str) {
        if reply.is_empty() {
            info!("Orchestrator: empty response");
            self.apply(Trigger::ResponseEmpty);
            return;
        }
        if !self.output.is_available() {
            debug!("Orchestrator: no speech output, response shown only");
            self.apply(Trigger::ResponseEmpty);
            return;
        }
        match self.output.speak(reply) {
            Ok(id) => {
                debug!(utterance = id, "Orchestrator: speaking response");
                self.apply(Trigger::ResponseReady);
            }
            Err(e) => {
                warn!("Orchestrator: could not speak response: {}", e);
                self.apply(Trigger::ResponseEmpty);
            }
        }
    }

    fn on_capture_event(&mut self, event: RecognitionEvent) {
        match self.capture.handle_event(event) {
            CaptureUpdate::Partial(text) => {
                self.state.partial = text.clone();
                self.notifier.emit(SessionEvent::PartialTranscript(text));
                self.publish();
            }
            CaptureUpdate::Failed(message) => {
                self.state.partial.clear();
                self.notifier.emit(SessionEvent::CaptureError(message));
                if self.state.phase == Phase::Listening {
                    self.apply(Trigger::CaptureFailed);
                } else {
                    self.publish();
                }
            }
            CaptureUpdate::Ended => {
                // Re-listening is always the user's call.
                debug!(phase = %self.state.phase, "Orchestrator: capture engine ended");
            }
            CaptureUpdate::Ignored => {}
        }
    }

    fn on_output_event(&mut self, event: SynthesisEvent) {
        match self.output.handle_event(event) {
            OutputUpdate::Started => self.set_output_status(OutputStatus::Speaking),
            OutputUpdate::Finished => {
                self.set_output_status(OutputStatus::Idle);
                if self.state.phase == Phase::Speaking {
                    self.apply(Trigger::OutputFinished);
                }
            }
            OutputUpdate::Stale => {}
        }
    }

    fn set_output_status(&mut self, status: OutputStatus) {
        if self.state.output == status {
            return;
        }
        self.state.output = status;
        self.notifier.emit(SessionEvent::OutputStatus(status));
        self.publish();
    }

    /// Move to the next phase and announce what flipped. Illegal triggers are
    /// logged and leave the phase unchanged.
    fn apply(&mut self, trigger: Trigger) -> bool {
        let from = self.state.phase;
        let to = match from.transition(trigger) {
            Ok(to) => to,
            Err(e) => {
                warn!("Orchestrator: {}", e);
                return false;
            }
        };
        debug!(%from, %to, trigger = trigger.as_str(), "Orchestrator: transition");
        self.state.phase = to;

        self.notifier.emit(SessionEvent::PhaseChanged(to));
        if (from == Phase::Listening) != (to == Phase::Listening) {
            self.notifier.emit(SessionEvent::CaptureStatus(to == Phase::Listening));
        }
        if (from == Phase::Submitting) != (to == Phase::Submitting) {
            self.notifier.emit(SessionEvent::ProcessingStatus(to == Phase::Submitting));
        }
        self.publish();
        true
    }

    fn publish(&self) {
        self.notifier.publish(&self.state);
    }

    /// Release the engines. Safe to call more than once.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.capture.abort();
        if self.output.cancel() {
            self.state.output = OutputStatus::Idle;
        }
        info!("🛑 Orchestrator: torn down");
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        self.teardown();
    }
}
