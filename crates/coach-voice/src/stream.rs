//! Streaming response consumption: SSE frame decoding and the delta fold.
//!
//! The coaching service answers with newline-delimited `data: <json>` frames in the
//! OpenAI chat-completion chunk shape, ended by `data: [DONE]`. `SseDecoder` turns
//! raw network chunks into frames (buffering across chunk boundaries);
//! `StreamingResponseConsumer` folds the deltas into a `DeltaSink` as they arrive.

use crate::error::SubmissionFailure;
use crate::service::{ByteStream, CoachRequest, CoachService};
use crate::transcript::DeltaSink;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental assistant text (never empty).
    Delta(String),
    /// Control sentinel: the stream is over.
    Done,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode one line. Returns `None` for lines that carry nothing: blanks, comments,
/// non-`data` fields, empty deltas, and malformed JSON (skipped, never fatal).
pub fn decode_frame(line: &str) -> Option<Frame> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(Frame::Delta),
        Err(e) => {
            debug!("Stream: skipping malformed frame ({}): {:?}", e, payload);
            None
        }
    }
}

/// Incremental line decoder. Holds raw bytes until a full line is available, so
/// frames and multi-byte UTF-8 sequences split across chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network chunk; returns the frames it completed, in order.
    /// Nothing is returned once the sentinel has been decoded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(frame) = decode_frame(&line) {
                let is_done = frame == Frame::Done;
                frames.push(frame);
                if is_done {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// End of input: decode a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let frame = decode_frame(&String::from_utf8_lossy(&rest));
        if frame == Some(Frame::Done) {
            self.done = true;
        }
        frame
    }
}

/// Fold a response body into `sink`, one delta at a time, in decode order.
/// Returns the full assistant text; a transport error mid-stream fails the whole submission.
pub async fn consume<S, D>(mut body: S, sink: &mut D) -> Result<String, SubmissionFailure>
where
    S: Stream<Item = Result<Bytes, SubmissionFailure>> + Unpin,
    D: DeltaSink + ?Sized,
{
    let mut decoder = SseDecoder::new();
    let mut text = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for frame in decoder.push(&chunk) {
            apply_frame(frame, &mut text, sink);
        }
        if decoder.is_done() {
            break;
        }
    }
    if let Some(frame) = decoder.finish() {
        apply_frame(frame, &mut text, sink);
    }

    Ok(text)
}

fn apply_frame<D: DeltaSink + ?Sized>(frame: Frame, text: &mut String, sink: &mut D) {
    if let Frame::Delta(delta) = frame {
        text.push_str(&delta);
        sink.append_delta(&delta);
    }
}

/// Sends the transcript to the coaching service and streams the reply into a sink.
#[derive(Clone)]
pub struct StreamingResponseConsumer {
    service: Arc<dyn CoachService>,
}

impl StreamingResponseConsumer {
    pub fn new(service: Arc<dyn CoachService>) -> Self {
        Self { service }
    }

    /// Issue one request and fold its streamed reply into `sink`.
    pub async fn submit<D>(&self, request: CoachRequest, sink: &mut D) -> Result<String, SubmissionFailure>
    where
        D: DeltaSink + ?Sized,
    {
        info!(
            role = %request.role,
            messages = request.messages.len(),
            "Stream: submitting transcript"
        );
        let body: ByteStream = self.service.open_stream(&request).await?;
        let text = consume(body, sink).await?;
        info!(chars = text.len(), "Stream: response complete");
        Ok(text)
    }
}
