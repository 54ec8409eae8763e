//! Decoding of `text/event-stream` bodies into [`AgentEvent`]s.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use tracing::{debug, warn};

use agentflow_core::{AgentEvent, ApiError};

/// Parse raw SSE text into (event_type, data) pairs.
///
/// Multiple `data:` lines in one event are joined with `\n`. Events without
/// data (comments, keep-alives) are dropped.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim_start().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data.push(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() {
            if !current_data.is_empty() {
                events.push((std::mem::take(&mut current_event), current_data.join("\n")));
            }
            current_event.clear();
            current_data.clear();
        }
    }

    // Handle trailing event without blank line
    if !current_data.is_empty() {
        events.push((current_event, current_data.join("\n")));
    }

    events
}

/// Decode one SSE `data` payload. Malformed payloads are logged and skipped.
pub fn decode_event(event_type: &str, data: &str) -> Option<AgentEvent> {
    match serde_json::from_str::<AgentEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(event_type, error = %e, "skipping undecodable stream event");
            None
        }
    }
}

/// Turn `\r\n` into `\n`. A lone trailing `\r` is kept so the pair can be
/// completed by the next chunk.
fn strip_crlf(buf: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(buf.len());
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\r' && buf.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.put_u8(buf[i]);
        i += 1;
    }
    out
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Wraps a byte stream and yields agent events.
///
/// If no bytes arrive within `idle_duration` the stream yields
/// [`ApiError::IdleTimeout`] and ends. A transport error likewise ends it.
pub struct SseEventStream {
    inner: ByteStream,
    /// Raw bytes not yet framed. Decoded to text one complete frame at a
    /// time, so a character split across chunks survives.
    buffer: BytesMut,
    pending: VecDeque<AgentEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseEventStream {
    pub fn new<S, E>(byte_stream: S, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        use futures::TryStreamExt;
        Self {
            inner: Box::pin(byte_stream.map_err(|e| e.to_string())),
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_complete_events(&mut self) {
        if self.buffer.contains(&b'\r') {
            self.buffer = strip_crlf(&self.buffer);
        }
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame = self.buffer.split_to(pos + 2);
            self.decode_frame(&frame);
        }
    }

    fn decode_frame(&mut self, frame: &[u8]) {
        match std::str::from_utf8(frame) {
            Ok(text) => self.decode_chunk(text),
            Err(e) => warn!(error = %e, "skipping stream frame that is not valid UTF-8"),
        }
    }

    fn decode_chunk(&mut self, chunk: &str) {
        for (event_type, data) in parse_sse_lines(chunk) {
            if let Some(event) = decode_event(&event_type, &data) {
                self.pending.push_back(event);
            }
        }
    }
}

impl Stream for SseEventStream {
    type Item = Result<AgentEvent, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.pending.pop_front() {
            return Poll::Ready(Some(Ok(event)));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.pending.pop_front() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(ApiError::StreamInterrupted(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let remaining = self.buffer.split();
                        self.decode_frame(&remaining);
                    }
                    debug!(remaining = self.pending.len(), "event stream ended");
                    return match self.pending.pop_front() {
                        Some(event) => Poll::Ready(Some(Ok(event))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(ApiError::IdleTimeout(self.idle_duration))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
