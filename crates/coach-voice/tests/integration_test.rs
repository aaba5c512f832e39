//! Integration tests for the conversation loop
//!
//! Scripted recognition/synthesis engines and a scripted coaching service stand
//! in for the host, so every test runs without audio hardware or network.

use bytes::Bytes;
use coach_voice::{
    ConversationOrchestrator, EngineConfig, OrchestratorHandle, OutputStatus, Phase, RecognizerControl, Role,
    ScriptedCoachService, ScriptedRecognizer, ScriptedResponse, ScriptedSynthesizer, SessionEvent, SessionSnapshot,
    SubmissionFailure, SynthesizerControl, Turn, VoiceInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const OPENING: &str = "Hello! I'm ready to practice interviewing.";
const FALLBACK: &str = "I'm sorry, I had trouble processing that. Could you try again?";

struct Harness {
    handle: OrchestratorHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    recognizer: Option<RecognizerControl>,
    synth: Option<SynthesizerControl>,
    service: ScriptedCoachService,
    task: JoinHandle<()>,
}

impl Harness {
    fn new(with_capture: bool, with_output: bool) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (capture, recognizer) = if with_capture {
            let (capability, control) = ScriptedRecognizer::build();
            (Some(capability), Some(control))
        } else {
            (None, None)
        };
        let (synthesis, synth) = if with_output {
            let (capability, control) = ScriptedSynthesizer::build(vec![VoiceInfo::new("Daniel", "en-GB")]);
            (Some(capability), Some(control))
        } else {
            (None, None)
        };

        let service = ScriptedCoachService::new();
        let (mut orchestrator, handle) = ConversationOrchestrator::new(
            EngineConfig::default(),
            Role::new("software-engineer"),
            capture,
            synthesis,
            Arc::new(service.clone()),
        );
        let events = orchestrator.take_event_receiver().unwrap();
        assert!(orchestrator.take_event_receiver().is_none());
        let snapshots = handle.watch();
        let task = tokio::spawn(orchestrator.run());

        Self {
            handle,
            events,
            snapshots,
            recognizer,
            synth,
            service,
            task,
        }
    }

    fn recognizer(&self) -> &RecognizerControl {
        self.recognizer.as_ref().unwrap()
    }

    fn synth(&self) -> &SynthesizerControl {
        self.synth.as_ref().unwrap()
    }

    async fn wait_until(&mut self, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        timeout(Duration::from_secs(2), async {
            self.snapshots.wait_for(pred).await.map(|s| s.clone())
        })
        .await
        .expect("timed out waiting for session state")
        .expect("orchestrator stopped")
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Start the session and let the opening reply play out.
    async fn open_session(&mut self, reply: &[&str]) {
        self.service.push(ScriptedResponse::deltas(reply));
        assert_ok!(self.handle.start_session());
        self.wait_until(|s| s.speaking).await;
        self.synth().finish();
        self.wait_until(|s| s.phase == Phase::Idle && !s.speaking).await;
    }
}

fn frame(delta: &str) -> Bytes {
    let json = serde_json::json!({ "choices": [{ "delta": { "content": delta } }] });
    Bytes::from(format!("data: {}\n\n", json))
}

#[tokio::test]
async fn opening_turn_streams_and_is_spoken() {
    let mut h = Harness::new(true, true);
    h.service.push(ScriptedResponse::deltas(&["Tell me ", "about yourself."]));
    assert_ok!(h.handle.start_session());

    let snap = h.wait_until(|s| s.speaking).await;
    assert!(snap.is_started());
    assert_eq!(snap.phase, Phase::Speaking);
    assert_eq!(
        snap.transcript,
        vec![Turn::user(OPENING), Turn::assistant("Tell me about yourself.")]
    );

    let requests = h.service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages, vec![Turn::user(OPENING)]);
    assert_eq!(requests[0].role.as_str(), "software-engineer");

    let spoken = h.synth().spoken();
    assert_eq!(spoken.len(), 1);
    assert_eq!(spoken[0].text, "Tell me about yourself.");
    assert_eq!(spoken[0].voice.as_ref().unwrap().name, "Daniel");

    h.synth().finish();
    let snap = h.wait_until(|s| s.phase == Phase::Idle && !s.speaking).await;
    assert_eq!(snap.transcript.len(), 2);

    let deltas: Vec<SessionEvent> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::AssistantDelta(_)))
        .collect();
    assert_eq!(
        deltas,
        vec![
            SessionEvent::AssistantDelta("Tell me ".to_string()),
            SessionEvent::AssistantDelta("about yourself.".to_string()),
        ]
    );
}

#[tokio::test]
async fn second_start_session_is_a_no_op() {
    let mut h = Harness::new(true, true);
    h.open_session(&["Hi there."]).await;

    assert_ok!(h.handle.start_session());
    // Commands are handled in order, so once listening the start was seen.
    assert_ok!(h.handle.toggle_capture());
    let snap = h.wait_until(|s| s.listening).await;

    assert_eq!(h.service.requests().len(), 1);
    assert_eq!(snap.transcript.len(), 2);
}

#[tokio::test]
async fn rate_limit_falls_back_and_returns_to_idle() {
    let mut h = Harness::new(true, true);
    h.service.push(ScriptedResponse::Fail(SubmissionFailure::RateLimited));
    assert_ok!(h.handle.start_session());

    let snap = h
        .wait_until(|s| s.last_failure.is_some() && s.phase == Phase::Idle)
        .await;
    assert_eq!(snap.transcript, vec![Turn::user(OPENING), Turn::assistant(FALLBACK)]);
    assert_eq!(snap.last_failure, Some(SubmissionFailure::RateLimited));
    assert!(!snap.processing);
    assert!(h.synth().spoken().is_empty());

    let events = h.drain_events();
    assert!(events.contains(&SessionEvent::SubmissionFailed(SubmissionFailure::RateLimited)));
    assert!(events.contains(&SessionEvent::AssistantReplaced(FALLBACK.to_string())));
}

#[tokio::test]
async fn toggle_while_submitting_has_no_effect() {
    let mut h = Harness::new(true, true);
    let (response, body) = ScriptedResponse::live();
    h.service.push(response);
    assert_ok!(h.handle.start_session());
    h.wait_until(|s| s.processing).await;

    assert_ok!(h.handle.toggle_capture());
    assert_ok!(h.handle.toggle_capture());
    tokio::time::sleep(Duration::from_millis(50)).await;

    body.send(Ok(frame("Hel"))).unwrap();
    body.send(Ok(frame("lo"))).unwrap();
    body.send(Ok(Bytes::from_static(b"data: [DONE]\n\n"))).unwrap();
    drop(body);

    let snap = h.wait_until(|s| s.phase == Phase::Speaking).await;
    assert!(!snap.listening);
    assert_eq!(snap.transcript.last().unwrap().content, "Hello");
    assert_eq!(h.recognizer().count("start"), 0);
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::CaptureStatus(true))));
}

#[tokio::test]
async fn short_capture_never_becomes_a_turn() {
    let mut h = Harness::new(true, true);
    h.open_session(&["Ready when you are."]).await;

    assert_ok!(h.handle.toggle_capture());
    h.wait_until(|s| s.listening).await;
    h.recognizer().say_final(" ok ");
    h.wait_until(|s| s.partial == " ok ").await;

    assert_ok!(h.handle.toggle_capture());
    let snap = h.wait_until(|s| s.phase == Phase::Idle && !s.listening).await;
    assert_eq!(snap.transcript.len(), 2);
    assert_eq!(snap.partial, "");
    assert_eq!(h.service.requests().len(), 1);
    assert_eq!(h.recognizer().count("stop"), 1);
}

#[tokio::test]
async fn committed_capture_submits_user_turn() {
    let mut h = Harness::new(true, true);
    h.open_session(&["Tell me about a challenge."]).await;

    h.service.push(ScriptedResponse::deltas(&["Good ", "structure."]));
    assert_ok!(h.handle.toggle_capture());
    h.wait_until(|s| s.listening).await;
    h.recognizer().say_interim("I led");
    h.recognizer().say_final("I led a team of five");
    h.wait_until(|s| s.partial == "I led a team of five").await;

    assert_ok!(h.handle.toggle_capture());
    let snap = h.wait_until(|s| s.phase == Phase::Speaking).await;
    assert_eq!(snap.transcript.len(), 4);
    assert_eq!(snap.transcript[2], Turn::user("I led a team of five"));
    assert_eq!(snap.transcript[3], Turn::assistant("Good structure."));

    let requests = h.service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].messages,
        vec![
            Turn::user(OPENING),
            Turn::assistant("Tell me about a challenge."),
            Turn::user("I led a team of five"),
        ]
    );
}

#[tokio::test]
async fn barge_in_silences_output_before_listening() {
    let mut h = Harness::new(true, true);
    h.service.push(ScriptedResponse::deltas(&["A long answer to read out."]));
    assert_ok!(h.handle.start_session());
    h.wait_until(|s| s.speaking).await;
    h.drain_events();

    assert_ok!(h.handle.toggle_capture());
    let snap = h.wait_until(|s| s.listening).await;
    assert!(!snap.speaking);
    assert_eq!(h.synth().cancel_count(), 1);

    let events = h.drain_events();
    let silenced = events
        .iter()
        .position(|e| *e == SessionEvent::OutputStatus(OutputStatus::Idle))
        .expect("output went idle");
    let listening = events
        .iter()
        .position(|e| *e == SessionEvent::CaptureStatus(true))
        .expect("capture started");
    assert!(silenced < listening);

    // The engine reports the cut-off utterance; it must not disturb listening.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.handle.snapshot().listening);
}

#[tokio::test]
async fn missing_capture_engine_degrades() {
    let mut h = Harness::new(false, true);
    h.open_session(&["Hello."]).await;

    assert_ok!(h.handle.toggle_capture());
    let event = timeout(Duration::from_secs(2), async {
        loop {
            match h.events.recv().await {
                Some(SessionEvent::CaptureUnavailable) => break true,
                Some(_) => continue,
                None => break false,
            }
        }
    })
    .await
    .unwrap();
    assert!(event);
    assert_eq!(h.handle.snapshot().phase, Phase::Idle);
}

#[tokio::test]
async fn capture_error_discards_listen() {
    let mut h = Harness::new(true, true);
    h.open_session(&["Go ahead."]).await;

    assert_ok!(h.handle.toggle_capture());
    h.wait_until(|s| s.listening).await;
    h.recognizer().say_interim("half a sen");
    h.wait_until(|s| s.partial == "half a sen").await;
    h.recognizer().fail("network");

    let snap = h.wait_until(|s| s.phase == Phase::Idle && !s.listening).await;
    assert_eq!(snap.partial, "");
    assert_eq!(snap.transcript.len(), 2);
    assert!(h
        .drain_events()
        .contains(&SessionEvent::CaptureError("network".to_string())));
}

#[tokio::test]
async fn missing_output_engine_goes_straight_to_idle() {
    let mut h = Harness::new(true, false);
    h.service.push(ScriptedResponse::deltas(&["Welcome."]));
    assert_ok!(h.handle.start_session());

    let snap = h
        .wait_until(|s| s.is_started() && s.phase == Phase::Idle && s.transcript.len() == 2)
        .await;
    assert_eq!(snap.transcript[1].content, "Welcome.");
    assert!(!snap.speaking);
}

#[tokio::test]
async fn empty_response_is_not_spoken() {
    let mut h = Harness::new(true, true);
    h.service.push(ScriptedResponse::deltas(&[]));
    assert_ok!(h.handle.start_session());

    let snap = h
        .wait_until(|s| s.is_started() && s.phase == Phase::Idle && !s.processing)
        .await;
    assert_eq!(snap.transcript, vec![Turn::user(OPENING), Turn::assistant("")]);
    assert!(h.synth().spoken().is_empty());
}

#[tokio::test]
async fn shutdown_releases_capture() {
    let mut h = Harness::new(true, true);
    h.open_session(&["Hi."]).await;
    assert_ok!(h.handle.toggle_capture());
    h.wait_until(|s| s.listening).await;

    assert_ok!(h.handle.shutdown());
    timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();

    assert_eq!(h.recognizer().count("abort"), 1);
    assert_err!(h.handle.toggle_capture());
}

#[tokio::test]
async fn dropping_every_handle_cancels_output() {
    let h = Harness::new(true, true);
    let Harness {
        handle,
        mut snapshots,
        synth,
        service,
        task,
        ..
    } = h;
    let synth = synth.unwrap();
    service.push(ScriptedResponse::deltas(&["Still talking."]));
    assert_ok!(handle.start_session());
    timeout(Duration::from_secs(2), snapshots.wait_for(|s| s.speaking))
        .await
        .unwrap()
        .unwrap();

    drop(handle);
    timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(synth.cancel_count(), 1);
}

#[tokio::test]
async fn snapshot_only_host_runs_a_long_reply() {
    let service = ScriptedCoachService::new();
    let deltas: Vec<String> = (0..500).map(|i| format!("w{} ", i)).collect();
    let deltas: Vec<&str> = deltas.iter().map(String::as_str).collect();
    service.push(ScriptedResponse::deltas(&deltas));
    let (orchestrator, handle) = ConversationOrchestrator::new(
        EngineConfig::default(),
        Role::new("product-manager"),
        None,
        None,
        Arc::new(service),
    );
    let mut snapshots = handle.watch();
    let task = tokio::spawn(orchestrator.run());

    assert_ok!(handle.start_session());
    let snap = timeout(
        Duration::from_secs(2),
        snapshots.wait_for(|s| s.is_started() && s.phase == Phase::Idle && s.transcript.len() == 2),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(snap.transcript[1].content.starts_with("w0 w1 "));
    assert!(snap.transcript[1].content.ends_with("w499 "));

    assert_ok!(handle.shutdown());
    timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn toggle_without_capture_still_silences_output() {
    let mut h = Harness::new(false, true);
    h.service.push(ScriptedResponse::deltas(&["A long question."]));
    assert_ok!(h.handle.start_session());
    h.wait_until(|s| s.speaking).await;

    assert_ok!(h.handle.toggle_capture());
    let snap = h.wait_until(|s| s.phase == Phase::Idle && !s.speaking).await;
    assert!(!snap.listening);
    assert_eq!(h.synth().cancel_count(), 1);

    let events = h.drain_events();
    let silenced = events
        .iter()
        .position(|e| *e == SessionEvent::OutputStatus(OutputStatus::Idle))
        .unwrap();
    let unavailable = events
        .iter()
        .position(|e| *e == SessionEvent::CaptureUnavailable)
        .unwrap();
    assert!(silenced < unavailable);
}

#[tokio::test]
async fn whitespace_reply_is_still_spoken() {
    let mut h = Harness::new(true, true);
    h.service.push(ScriptedResponse::deltas(&["  "]));
    assert_ok!(h.handle.start_session());

    let snap = h.wait_until(|s| s.phase == Phase::Speaking).await;
    assert_eq!(snap.transcript[1].content, "  ");
    let spoken = h.synth().spoken();
    assert_eq!(spoken.len(), 1);
    assert_eq!(spoken[0].text, "  ");
}
