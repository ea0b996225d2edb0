use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::content::extract_delta_content;

/// Prefix marking a payload line in an event stream.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Longest incomplete line kept in the buffer; longer lines are discarded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Lazy sequence of non-empty assistant text fragments, in arrival order.
pub type ContentStream = BoxStream<'static, String>;

/// One meaningful line decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Content(String),
    Done,
}

/// Incremental line splitter for `data: <payload>` event streams.
///
/// Bytes are buffered until a `\n` arrives, so partial lines and UTF-8
/// sequences split across reads are never decoded early. Once the `[DONE]`
/// sentinel is seen the decoder is finished and ignores further input.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
    /// Set while skipping the tail of a line that outgrew `MAX_LINE_BYTES`.
    discarding: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns frames for every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let line_end = consumed + offset;
            let line = &self.buffer[consumed..line_end];
            consumed = line_end + 1;

            if std::mem::take(&mut self.discarding) {
                continue;
            }

            let frame = match std::str::from_utf8(line) {
                Ok(line) => decode_line(line),
                Err(error) => {
                    tracing::warn!(error = %error, "dropping stream line with invalid UTF-8");
                    None
                }
            };

            match frame {
                Some(SseFrame::Done) => {
                    self.finished = true;
                    frames.push(SseFrame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        if self.finished {
            self.buffer.clear();
        } else {
            self.buffer.drain(..consumed);
            if self.buffer.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    pending_bytes = self.buffer.len(),
                    limit = MAX_LINE_BYTES,
                    "dropping oversized stream line"
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        frames
    }

    /// True once the `[DONE]` sentinel has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of buffered bytes belonging to an incomplete line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Decodes one complete line (without its terminating `\n`).
///
/// Returns `None` for lines that carry nothing usable: non-`data:` lines,
/// invalid JSON, or JSON without content.
fn decode_line(line: &str) -> Option<SseFrame> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();

    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }

    let parsed = match serde_json::from_str::<Value>(payload) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(error = %error, payload, "dropping unparseable stream frame");
            return None;
        }
    };

    match extract_delta_content(&parsed) {
        Some(content) => Some(SseFrame::Content(content.to_string())),
        None => {
            tracing::trace!(payload, "stream frame carries no content");
            None
        }
    }
}

struct DecodeState<S> {
    source: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    idle_timeout: Option<Duration>,
}

/// Wraps a byte stream into a [`ContentStream`].
///
/// The sequence ends on `[DONE]`, on end of input, on a read error, or when no
/// chunk arrives within `idle_timeout`. The last three are logged but never
/// surfaced: callers see a shorter, still valid, sequence.
pub fn decode_content_stream<S, B, E>(source: S, idle_timeout: Option<Duration>) -> ContentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        idle_timeout,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.ready.pop_front() {
                return Some((fragment, state));
            }

            if state.decoder.is_finished() {
                return None;
            }

            let next = match state.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, state.source.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            idle_timeout_ms = limit.as_millis() as u64,
                            "event stream idle timeout elapsed; ending stream"
                        );
                        return None;
                    }
                },
                None => state.source.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(chunk.as_ref()) {
                        if let SseFrame::Content(content) = frame {
                            state.ready.push_back(content);
                        }
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(error = %error, "event stream read failed; ending stream");
                    return None;
                }
                None => {
                    if state.decoder.pending_len() > 0 {
                        tracing::debug!(
                            pending_bytes = state.decoder.pending_len(),
                            "event stream closed mid-line; discarding partial frame"
                        );
                    }
                    return None;
                }
            }
        }
    })
    .boxed()
}
