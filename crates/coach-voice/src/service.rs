//! Coaching service client: the one network call of the engine.
//!
//! `POST <service_url>` with `{ messages, role }`, bearer auth, JSON body. A 2xx
//! answer is a chunked event stream; 429 and 402 are the rate and usage limits.

use crate::config::EngineConfig;
use crate::error::{SubmissionFailure, VoiceError, VoiceResult};
use crate::role::Role;
use crate::transcript::Turn;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

/// Raw response body, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SubmissionFailure>> + Send>>;

/// Request body sent to the coaching service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoachRequest {
    pub messages: Vec<Turn>,
    pub role: Role,
}

impl CoachRequest {
    pub fn new(messages: &[Turn], role: &Role) -> Self {
        Self {
            messages: messages.to_vec(),
            role: role.clone(),
        }
    }
}

/// Remote streaming text service the orchestrator submits through.
#[async_trait]
pub trait CoachService: Send + Sync {
    /// Send the request; on a 2xx answer, hand back the body to be read incrementally.
    async fn open_stream(&self, request: &CoachRequest) -> Result<ByteStream, SubmissionFailure>;
}

/// Production backend: HTTP POST with a streamed body (`reqwest`).
#[derive(Debug, Clone)]
pub struct HttpCoachService {
    /// Full endpoint URL.
    pub url: String,
    /// Bearer API key.
    pub api_key: String,
    client: reqwest::Client,
}

impl HttpCoachService {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(url, api_key, client))
    }

    /// Use an already configured client (proxy, TLS, timeouts).
    pub fn with_client(url: impl Into<String>, api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into().trim().to_string(),
            client,
        }
    }

    pub fn from_config(config: &EngineConfig) -> VoiceResult<Self> {
        if config.api_key.trim().is_empty() {
            warn!("Coach service: no COACH_API_KEY configured, sending unauthenticated requests");
        }
        Self::new(&config.service_url, &config.api_key, config.request_timeout())
    }
}

#[async_trait]
impl CoachService for HttpCoachService {
    async fn open_stream(&self, request: &CoachRequest) -> Result<ByteStream, SubmissionFailure> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("Coach service error {}: {}", status, body);
            return Err(SubmissionFailure::from_status(status.as_u16()));
        }

        let body = res
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| SubmissionFailure::Stream(e.to_string())));
        Ok(Box::pin(body))
    }
}

/// One scripted answer of a `ScriptedCoachService`.
pub enum ScriptedResponse {
    /// Body delivered as these chunks, then closed.
    Chunks(Vec<Bytes>),
    /// Submission fails before any body.
    Fail(SubmissionFailure),
    /// Body fed live through the paired sender; closes when the sender drops.
    Live(mpsc::UnboundedReceiver<Result<Bytes, SubmissionFailure>>),
}

impl ScriptedResponse {
    /// A well-formed event stream carrying `deltas`, then `[DONE]`.
    pub fn deltas(deltas: &[&str]) -> Self {
        let mut chunks: Vec<Bytes> = deltas
            .iter()
            .map(|d| {
                let frame = serde_json::json!({ "choices": [{ "delta": { "content": d } }] });
                Bytes::from(format!("data: {}\n\n", frame))
            })
            .collect();
        chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
        ScriptedResponse::Chunks(chunks)
    }

    /// A live body and the sender that feeds it.
    pub fn live() -> (Self, mpsc::UnboundedSender<Result<Bytes, SubmissionFailure>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ScriptedResponse::Live(rx), tx)
    }
}

/// In-memory coaching service for tests and offline demos. Answers from a queue
/// and records every request; an exhausted queue answers `MissingBody`.
#[derive(Clone, Default)]
pub struct ScriptedCoachService {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<CoachRequest>>>,
}

impl ScriptedCoachService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn requests(&self) -> Vec<CoachRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CoachService for ScriptedCoachService {
    async fn open_stream(&self, request: &CoachRequest) -> Result<ByteStream, SubmissionFailure> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(ScriptedResponse::Chunks(chunks)) => {
                Ok(Box::pin(futures::stream::iter(
                    chunks.into_iter().map(Ok::<Bytes, SubmissionFailure>),
                )))
            }
            Some(ScriptedResponse::Fail(failure)) => Err(failure),
            Some(ScriptedResponse::Live(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(SubmissionFailure::MissingBody),
        }
    }
}
