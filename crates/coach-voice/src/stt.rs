//! **Speech Capture** — wraps a host speech-to-text engine for the orchestrator.
//!
//! The host provides a continuous, interim-result-capable `RecognitionEngine` and
//! a channel of `RecognitionEvent`s. When the host has no engine, the adapter is
//! built disabled and `start()` reports `CaptureUnavailable` instead of failing
//! the session.

use crate::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Settings applied to the engine once, at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSettings {
    pub continuous: bool,
    pub interim_results: bool,
    pub lang: String,
}

impl RecognitionSettings {
    pub fn continuous(lang: impl Into<String>) -> Self {
        Self {
            continuous: true,
            interim_results: true,
            lang: lang.into(),
        }
    }
}

/// Best alternative of one recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: true,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: false,
        }
    }
}

/// Events raised by a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Results changed; entries from `result_index` onward are new or updated.
    Result {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    /// Engine-level fault (permission denied, no speech, network...).
    Error(String),
    /// Engine stopped delivering results.
    End,
}

/// Host-provided speech-to-text capability.
pub trait RecognitionEngine: Send {
    fn configure(&mut self, settings: &RecognitionSettings);
    fn start(&mut self) -> VoiceResult<()>;
    fn stop(&mut self);
    fn abort(&mut self);
}

/// An engine together with the channel its events arrive on.
pub struct CaptureCapability {
    pub engine: Box<dyn RecognitionEngine>,
    pub events: mpsc::UnboundedReceiver<RecognitionEvent>,
}

/// Best current hypothesis for one event: finals from `result_index` onward if any,
/// otherwise the interims, concatenated in result order.
pub fn best_hypothesis(result_index: usize, results: &[RecognitionResult]) -> String {
    let mut finals = String::new();
    let mut interims = String::new();
    for result in results.iter().skip(result_index) {
        if result.is_final {
            finals.push_str(&result.transcript);
        } else {
            interims.push_str(&result.transcript);
        }
    }
    if finals.is_empty() {
        interims
    } else {
        finals
    }
}

/// What a recognition event meant for the current listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    /// New live caption.
    Partial(String),
    /// Engine fault; capture is no longer listening and the partial is gone.
    Failed(String),
    /// Engine ended on its own. Capture is not restarted.
    Ended,
    /// Nothing to do (event arrived while not listening).
    Ignored,
}

/// Wraps the optional recognition engine and owns the partial-capture buffer.
pub struct SpeechCaptureAdapter {
    engine: Option<Box<dyn RecognitionEngine>>,
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
    listening: bool,
    partial: String,
}

impl SpeechCaptureAdapter {
    /// Build from whatever the host offers. `None` gives a disabled adapter.
    pub fn probe(capability: Option<CaptureCapability>, locale: &str) -> Self {
        match capability {
            Some(CaptureCapability { mut engine, events }) => {
                engine.configure(&RecognitionSettings::continuous(locale));
                info!("Capture: recognition engine available ({})", locale);
                Self {
                    engine: Some(engine),
                    events: Some(events),
                    listening: false,
                    partial: String::new(),
                }
            }
            None => {
                warn!("Capture: no recognition engine on this host, voice input disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            engine: None,
            events: None,
            listening: false,
            partial: String::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Current running hypothesis (live caption).
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Clear the previous buffer and begin continuous capture.
    pub fn start(&mut self) -> VoiceResult<()> {
        let engine = self.engine.as_mut().ok_or(VoiceError::CaptureUnavailable)?;
        self.partial.clear();
        if let Err(e) = engine.start() {
            self.listening = false;
            return Err(e);
        }
        self.listening = true;
        debug!("Capture: listening");
        Ok(())
    }

    /// End capture and hand back the text captured since `start()`.
    pub fn stop(&mut self) -> String {
        if let Some(engine) = self.engine.as_mut() {
            if self.listening {
                engine.stop();
            }
        }
        self.listening = false;
        std::mem::take(&mut self.partial)
    }

    /// Release the engine immediately, discarding anything captured (teardown).
    pub fn abort(&mut self) {
        if self.listening {
            if let Some(engine) = self.engine.as_mut() {
                engine.abort();
            }
            info!("Capture: aborted");
        }
        self.listening = false;
        self.partial.clear();
    }

    /// Interpret one engine event.
    pub fn handle_event(&mut self, event: RecognitionEvent) -> CaptureUpdate {
        match event {
            RecognitionEvent::Result {
                result_index,
                results,
            } => {
                if !self.listening {
                    return CaptureUpdate::Ignored;
                }
                self.partial = best_hypothesis(result_index, &results);
                CaptureUpdate::Partial(self.partial.clone())
            }
            RecognitionEvent::Error(message) => {
                if !self.listening {
                    debug!("Capture: error while idle ignored: {}", message);
                    return CaptureUpdate::Ignored;
                }
                warn!("Capture: recognition error: {}", message);
                self.listening = false;
                self.partial.clear();
                CaptureUpdate::Failed(message)
            }
            RecognitionEvent::End => {
                debug!("Capture: engine ended (no auto-restart)");
                CaptureUpdate::Ended
            }
        }
    }

    /// Next engine event. Pends forever when capture is unsupported; a closed
    /// channel is reported once as an error and the adapter degrades to disabled.
    pub async fn next_event(&mut self) -> RecognitionEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Some(event) => event,
            None => {
                warn!("Capture: recognition engine disconnected");
                self.events = None;
                self.engine = None;
                RecognitionEvent::Error("recognition engine disconnected".to_string())
            }
        }
    }
}

/// In-memory recognition engine for tests and demos. Pair with `RecognizerControl`
/// to inject results and inspect the calls made on the engine.
pub struct ScriptedRecognizer {
    calls: Arc<Mutex<Vec<String>>>,
    fail_next_start: Arc<AtomicBool>,
}

/// Drives a `ScriptedRecognizer` from the outside.
#[derive(Clone)]
pub struct RecognizerControl {
    calls: Arc<Mutex<Vec<String>>>,
    fail_next_start: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl ScriptedRecognizer {
    pub fn build() -> (CaptureCapability, RecognizerControl) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fail_next_start = Arc::new(AtomicBool::new(false));
        let engine = ScriptedRecognizer {
            calls: Arc::clone(&calls),
            fail_next_start: Arc::clone(&fail_next_start),
        };
        let control = RecognizerControl {
            calls,
            fail_next_start,
            events: events_tx,
        };
        (
            CaptureCapability {
                engine: Box::new(engine),
                events: events_rx,
            },
            control,
        )
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl RecognitionEngine for ScriptedRecognizer {
    fn configure(&mut self, settings: &RecognitionSettings) {
        self.record(format!("configure:{}", settings.lang));
    }

    fn start(&mut self) -> VoiceResult<()> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            self.record("start-failed".to_string());
            return Err(VoiceError::Capture("not-allowed".to_string()));
        }
        self.record("start".to_string());
        Ok(())
    }

    fn stop(&mut self) {
        self.record("stop".to_string());
    }

    fn abort(&mut self) {
        self.record("abort".to_string());
    }
}

impl RecognizerControl {
    pub fn emit(&self, event: RecognitionEvent) {
        let _ = self.events.send(event);
    }

    /// One finalized result covering the whole utterance so far.
    pub fn say_final(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::final_text(text)],
        });
    }

    pub fn say_interim(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::interim(text)],
        });
    }

    pub fn fail(&self, message: &str) {
        self.emit(RecognitionEvent::Error(message.to_string()));
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }
}
