//! **Speech Output** — text-to-speech with barge-in and deterministic voice choice.
//!
//! Wraps a host `SynthesisEngine`. Every `speak()` cancels whatever is playing and
//! replaces it (no queue). Each utterance carries an id, so start/end signals from
//! an utterance that was cancelled or replaced are ignored.

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A voice the host engine can speak with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub lang: String,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

pub type UtteranceId = u64;

/// One request to the synthesis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    /// `None` means the engine default voice.
    pub voice: Option<VoiceInfo>,
}

/// Lifecycle signals raised by the synthesis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    Failed(UtteranceId, String),
}

/// Host-provided text-to-speech capability.
pub trait SynthesisEngine: Send {
    /// Voices known right now. May be empty or incomplete early on.
    fn voices(&self) -> Vec<VoiceInfo>;
    fn speak(&mut self, utterance: Utterance) -> VoiceResult<()>;
    fn cancel(&mut self);
}

/// An engine together with the channel its events arrive on.
pub struct SynthesisCapability {
    pub engine: Box<dyn SynthesisEngine>,
    pub events: mpsc::UnboundedReceiver<SynthesisEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    #[default]
    Idle,
    Speaking,
}

/// Pick a voice, first match wins:
/// 1. target locale and a preferred-name marker,
/// 2. target locale and the platform-default marker,
/// 3. exactly the target locale,
/// 4. locale starting with the target,
/// 5. none (engine default).
pub fn select_voice<'a>(voices: &'a [VoiceInfo], policy: &VoiceConfig) -> Option<&'a VoiceInfo> {
    let target = policy.target_locale.as_str();
    let exact = |v: &&VoiceInfo| v.lang == target;

    voices
        .iter()
        .filter(exact)
        .find(|v| policy.preferred_markers.iter().any(|m| v.name.contains(m.as_str())))
        .or_else(|| {
            voices
                .iter()
                .filter(exact)
                .find(|v| v.name.contains(policy.platform_marker.as_str()))
        })
        .or_else(|| voices.iter().find(exact))
        .or_else(|| voices.iter().find(|v| v.lang.starts_with(target)))
}

/// What a synthesis event meant for output status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputUpdate {
    /// Current utterance started playing.
    Started,
    /// Current utterance ended or errored; output is idle.
    Finished,
    /// Signal from an utterance that is no longer current.
    Stale,
}

/// Wraps the optional synthesis engine and tracks the current utterance.
pub struct SpeechOutputAdapter {
    engine: Option<Box<dyn SynthesisEngine>>,
    events: Option<mpsc::UnboundedReceiver<SynthesisEvent>>,
    voice: VoiceConfig,
    status: OutputStatus,
    current: Option<UtteranceId>,
    next_id: UtteranceId,
}

impl SpeechOutputAdapter {
    /// Build from whatever the host offers. `None` gives a disabled adapter.
    pub fn probe(capability: Option<SynthesisCapability>, voice: VoiceConfig) -> Self {
        let (engine, events) = match capability {
            Some(SynthesisCapability { engine, events }) => {
                info!("VoiceOutput: synthesis engine available");
                (Some(engine), Some(events))
            }
            None => {
                warn!("VoiceOutput: no synthesis engine on this host, responses will not be spoken");
                (None, None)
            }
        };
        Self {
            engine,
            events,
            voice,
            status: OutputStatus::Idle,
            current: None,
            next_id: 1,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn status(&self) -> OutputStatus {
        self.status
    }

    /// Whether an utterance has been handed to the engine and not yet finished.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Interrupt anything in flight and speak `text` with the configured voice settings.
    pub fn speak(&mut self, text: &str) -> VoiceResult<UtteranceId> {
        if self.engine.is_none() {
            return Err(VoiceError::OutputUnavailable);
        }
        self.cancel();

        let engine = self.engine.as_mut().ok_or(VoiceError::OutputUnavailable)?;
        let voices = engine.voices();
        let voice = select_voice(&voices, &self.voice).cloned();
        match &voice {
            Some(v) => debug!("VoiceOutput: using voice {} ({})", v.name, v.lang),
            None => debug!("VoiceOutput: no matching voice among {}, using engine default", voices.len()),
        }

        let id = self.next_id;
        self.next_id += 1;
        let utterance = Utterance {
            id,
            text: text.to_string(),
            rate: self.voice.rate,
            pitch: self.voice.pitch,
            volume: self.voice.volume,
            voice,
        };
        engine.speak(utterance)?;
        self.current = Some(id);
        Ok(id)
    }

    /// Stop the in-flight utterance now. Returns true if output status changed.
    pub fn cancel(&mut self) -> bool {
        if self.current.take().is_some() {
            if let Some(engine) = self.engine.as_mut() {
                engine.cancel();
            }
            info!("VoiceOutput: stopped (interruption or manual)");
        }
        let was_speaking = self.status == OutputStatus::Speaking;
        self.status = OutputStatus::Idle;
        was_speaking
    }

    /// Interpret one engine event.
    pub fn handle_event(&mut self, event: SynthesisEvent) -> OutputUpdate {
        let id = match &event {
            SynthesisEvent::Started(id) | SynthesisEvent::Ended(id) | SynthesisEvent::Failed(id, _) => *id,
        };
        if self.current != Some(id) {
            debug!("VoiceOutput: ignoring {:?} from superseded utterance", event);
            return OutputUpdate::Stale;
        }
        match event {
            SynthesisEvent::Started(_) => {
                self.status = OutputStatus::Speaking;
                OutputUpdate::Started
            }
            SynthesisEvent::Ended(_) => {
                self.current = None;
                self.status = OutputStatus::Idle;
                OutputUpdate::Finished
            }
            SynthesisEvent::Failed(_, message) => {
                warn!("VoiceOutput: utterance {} failed: {}", id, message);
                self.current = None;
                self.status = OutputStatus::Idle;
                OutputUpdate::Finished
            }
        }
    }

    /// Next engine event. Pends forever when output is unsupported; a closed
    /// channel fails the current utterance once and the adapter degrades to disabled.
    pub async fn next_event(&mut self) -> SynthesisEvent {
        loop {
            let Some(events) = self.events.as_mut() else {
                return std::future::pending().await;
            };
            match events.recv().await {
                Some(event) => return event,
                None => {
                    warn!("VoiceOutput: synthesis engine disconnected");
                    self.events = None;
                    self.engine = None;
                    if let Some(id) = self.current {
                        return SynthesisEvent::Failed(id, "synthesis engine disconnected".to_string());
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct ScriptedSynthState {
    spoken: Vec<Utterance>,
    current: Option<UtteranceId>,
    cancels: usize,
}

/// In-memory synthesis engine for tests and demos. Emits `Started` as soon as an
/// utterance is spoken (unless disabled); `SynthesizerControl::finish` ends it.
pub struct ScriptedSynthesizer {
    voices: Vec<VoiceInfo>,
    auto_start: bool,
    state: Arc<Mutex<ScriptedSynthState>>,
    events: mpsc::UnboundedSender<SynthesisEvent>,
}

/// Drives a `ScriptedSynthesizer` from the outside.
#[derive(Clone)]
pub struct SynthesizerControl {
    state: Arc<Mutex<ScriptedSynthState>>,
    events: mpsc::UnboundedSender<SynthesisEvent>,
}

impl ScriptedSynthesizer {
    pub fn build(voices: Vec<VoiceInfo>) -> (SynthesisCapability, SynthesizerControl) {
        Self::build_with(voices, true)
    }

    pub fn build_with(voices: Vec<VoiceInfo>, auto_start: bool) -> (SynthesisCapability, SynthesizerControl) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ScriptedSynthState::default()));
        let engine = ScriptedSynthesizer {
            voices,
            auto_start,
            state: Arc::clone(&state),
            events: events_tx.clone(),
        };
        (
            SynthesisCapability {
                engine: Box::new(engine),
                events: events_rx,
            },
            SynthesizerControl {
                state,
                events: events_tx,
            },
        )
    }
}

impl SynthesisEngine for ScriptedSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) -> VoiceResult<()> {
        let id = utterance.id;
        let mut state = self
            .state
            .lock()
            .map_err(|e| VoiceError::Synthesis(format!("lock poisoned: {}", e)))?;
        state.spoken.push(utterance);
        state.current = Some(id);
        if self.auto_start {
            let _ = self.events.send(SynthesisEvent::Started(id));
        }
        Ok(())
    }

    fn cancel(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancels += 1;
            if let Some(id) = state.current.take() {
                // Hosts typically report the cut-off utterance as an error.
                let _ = self.events.send(SynthesisEvent::Failed(id, "interrupted".to_string()));
            }
        }
    }
}

impl SynthesizerControl {
    /// Start the current utterance (when built without auto-start).
    pub fn start(&self) {
        if let Some(id) = self.current() {
            let _ = self.events.send(SynthesisEvent::Started(id));
        }
    }

    /// End the current utterance normally.
    pub fn finish(&self) {
        let id = self.state.lock().ok().and_then(|mut s| s.current.take());
        if let Some(id) = id {
            let _ = self.events.send(SynthesisEvent::Ended(id));
        }
    }

    /// Fail the current utterance.
    pub fn fail(&self, message: &str) {
        let id = self.state.lock().ok().and_then(|mut s| s.current.take());
        if let Some(id) = id {
            let _ = self.events.send(SynthesisEvent::Failed(id, message.to_string()));
        }
    }

    pub fn current(&self) -> Option<UtteranceId> {
        self.state.lock().ok().and_then(|s| s.current)
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.state.lock().map(|s| s.spoken.clone()).unwrap_or_default()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().map(|s| s.cancels).unwrap_or_default()
    }
}
