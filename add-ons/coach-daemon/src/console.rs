//! Terminal stand-ins for the host speech engines.
//!
//! Recognition: typed lines become final results while capture is listening.
//! Synthesis: either a timer that approximates how long the reply would take to
//! say, or an external TTS command (`COACH_TTS_COMMAND`) fed on stdin.

use coach_voice::{
    CaptureCapability, RecognitionEngine, RecognitionEvent, RecognitionResult, RecognitionSettings,
    SynthesisCapability, SynthesisEngine, SynthesisEvent, Utterance, UtteranceId, VoiceError, VoiceInfo,
    VoiceResult,
};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Rough speaking pace of the console voice at rate 1.0.
const MS_PER_WORD: f32 = 280.0;

#[derive(Default)]
struct Listen {
    listening: bool,
    results: Vec<RecognitionResult>,
}

/// Recognition engine whose "microphone" is stdin.
pub struct ConsoleRecognizer {
    listen: Arc<Mutex<Listen>>,
}

/// Stdin side of a `ConsoleRecognizer`.
pub struct ConsoleFeeder {
    listen: Arc<Mutex<Listen>>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

pub fn console_recognizer() -> (CaptureCapability, ConsoleFeeder) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let listen = Arc::new(Mutex::new(Listen::default()));
    let engine = ConsoleRecognizer {
        listen: Arc::clone(&listen),
    };
    (
        CaptureCapability {
            engine: Box::new(engine),
            events: events_rx,
        },
        ConsoleFeeder {
            listen,
            events: events_tx,
        },
    )
}

impl ConsoleRecognizer {
    fn set(&self, listening: bool, clear: bool) {
        if let Ok(mut listen) = self.listen.lock() {
            listen.listening = listening;
            if clear {
                listen.results.clear();
            }
        }
    }
}

impl RecognitionEngine for ConsoleRecognizer {
    fn configure(&mut self, settings: &RecognitionSettings) {
        debug!(lang = %settings.lang, continuous = settings.continuous, "Console STT: configured");
    }

    fn start(&mut self) -> VoiceResult<()> {
        self.set(true, true);
        Ok(())
    }

    fn stop(&mut self) {
        self.set(false, false);
    }

    fn abort(&mut self) {
        self.set(false, true);
    }
}

impl ConsoleFeeder {
    /// Treat `line` as recognized speech. Returns false when capture is not listening.
    pub fn hear(&self, line: &str) -> bool {
        let Ok(mut listen) = self.listen.lock() else {
            return false;
        };
        if !listen.listening {
            return false;
        }
        let segment = if listen.results.is_empty() {
            line.to_string()
        } else {
            format!(" {}", line)
        };
        listen.results.push(RecognitionResult::final_text(segment));
        let _ = self.events.send(RecognitionEvent::Result {
            result_index: 0,
            results: listen.results.clone(),
        });
        true
    }

    pub fn is_listening(&self) -> bool {
        self.listen.lock().map(|l| l.listening).unwrap_or(false)
    }
}

/// The utterance currently being "played", and the task playing it.
struct Playback {
    events: mpsc::UnboundedSender<SynthesisEvent>,
    current: Option<(UtteranceId, JoinHandle<()>)>,
}

impl Playback {
    fn new(events: mpsc::UnboundedSender<SynthesisEvent>) -> Self {
        Self { events, current: None }
    }

    fn spawn<F>(&mut self, id: UtteranceId, task: F) -> VoiceResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::Synthesis(format!("no async runtime: {}", e)))?;
        self.cancel();
        self.current = Some((id, runtime.spawn(task)));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some((id, task)) = self.current.take() {
            if !task.is_finished() {
                task.abort();
                let _ = self.events.send(SynthesisEvent::Failed(id, "interrupted".to_string()));
            }
        }
    }
}

/// Prints nothing itself (the reply is already on screen); just holds the
/// "speaking" state for as long as the reply would take to say.
pub struct ConsoleSynthesizer {
    playback: Playback,
}

pub fn console_synthesizer() -> SynthesisCapability {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    SynthesisCapability {
        engine: Box::new(ConsoleSynthesizer {
            playback: Playback::new(events_tx),
        }),
        events: events_rx,
    }
}

pub fn speaking_time(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    Duration::from_millis((words * MS_PER_WORD / rate.max(0.1)) as u64)
}

impl SynthesisEngine for ConsoleSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo::new("Console", "en-GB")]
    }

    fn speak(&mut self, utterance: Utterance) -> VoiceResult<()> {
        let id = utterance.id;
        let duration = speaking_time(&utterance.text, utterance.rate);
        let events = self.playback.events.clone();
        self.playback.spawn(id, async move {
            let _ = events.send(SynthesisEvent::Started(id));
            tokio::time::sleep(duration).await;
            let _ = events.send(SynthesisEvent::Ended(id));
        })
    }

    fn cancel(&mut self) {
        self.playback.cancel();
    }
}

/// Pipes each utterance into an external TTS program (e.g. `espeak-ng`);
/// cancelling kills the child.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    playback: Playback,
}

/// Parse `COACH_TTS_COMMAND` (`program arg...`). `None` for a blank value.
pub fn command_synthesizer(command_line: &str) -> Option<SynthesisCapability> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    let args: Vec<String> = parts.collect();
    info!(program = %program, "Command TTS: using external synthesizer");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    Some(SynthesisCapability {
        engine: Box::new(CommandSynthesizer {
            program,
            args,
            playback: Playback::new(events_tx),
        }),
        events: events_rx,
    })
}

impl SynthesisEngine for CommandSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        // The program picks its own voice.
        Vec::new()
    }

    fn speak(&mut self, utterance: Utterance) -> VoiceResult<()> {
        let id = utterance.id;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("failed to spawn {}: {}", self.program, e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Synthesis("failed to open stdin".to_string()))?;

        let events = self.playback.events.clone();
        let text = utterance.text;
        self.playback.spawn(id, async move {
            let _ = events.send(SynthesisEvent::Started(id));
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                warn!("Command TTS: failed to write text: {}", e);
            }
            drop(stdin);
            let event = match child.wait().await {
                Ok(status) if status.success() => SynthesisEvent::Ended(id),
                Ok(status) => SynthesisEvent::Failed(id, format!("exited with {}", status)),
                Err(e) => SynthesisEvent::Failed(id, e.to_string()),
            };
            let _ = events.send(event);
        })
    }

    fn cancel(&mut self) {
        self.playback.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeder_accumulates_lines_while_listening() {
        let (mut capability, feeder) = console_recognizer();
        assert!(!feeder.hear("ignored"));

        capability.engine.start().unwrap();
        assert!(feeder.hear("I led"));
        assert!(feeder.hear("a team"));
        capability.events.try_recv().unwrap();
        match capability.events.try_recv().unwrap() {
            RecognitionEvent::Result { result_index, results } => {
                assert_eq!(coach_voice::best_hypothesis(result_index, &results), "I led a team");
            }
            other => panic!("unexpected {:?}", other),
        }

        capability.engine.stop();
        assert!(!feeder.is_listening());
        capability.engine.start().unwrap();
        assert!(feeder.hear("fresh"));
        capability.events.try_recv().unwrap();
    }

    #[test]
    fn speaking_time_scales_with_words_and_rate() {
        let slow = speaking_time("one two three four", 0.5);
        let fast = speaking_time("one two three four", 2.0);
        assert!(slow > fast);
        assert!(speaking_time("", 1.0) > Duration::ZERO);
    }

    #[test]
    fn blank_tts_command_is_rejected() {
        assert!(command_synthesizer("   ").is_none());
        assert!(command_synthesizer("espeak-ng -v en-gb").is_some());
    }

    #[tokio::test]
    async fn console_synthesizer_reports_lifecycle() {
        let mut capability = console_synthesizer();
        capability
            .engine
            .speak(Utterance {
                id: 7,
                text: "hi".to_string(),
                rate: 100.0,
                pitch: 1.0,
                volume: 1.0,
                voice: None,
            })
            .unwrap();
        assert_eq!(capability.events.recv().await, Some(SynthesisEvent::Started(7)));
        assert_eq!(capability.events.recv().await, Some(SynthesisEvent::Ended(7)));
    }

    #[tokio::test]
    async fn console_synthesizer_cancel_fails_utterance() {
        let mut capability = console_synthesizer();
        capability
            .engine
            .speak(Utterance {
                id: 3,
                text: "a fairly long reply that takes a while".to_string(),
                rate: 1.0,
                pitch: 1.0,
                volume: 1.0,
                voice: None,
            })
            .unwrap();
        capability.engine.cancel();
        assert_eq!(
            capability.events.recv().await,
            Some(SynthesisEvent::Failed(3, "interrupted".to_string()))
        );
    }
}
