//! Incremental decoding of streamed responses
//!
//! The body is framed by a [`tokio_util::codec::Decoder`] ([`SseCodec`] for
//! server-sent events, [`NdjsonCodec`] for newline-delimited JSON), and every
//! frame is mapped to a [`StreamStep`]. The resulting [`EventStream`] is lazy,
//! forward-only and ends at the end marker, at stream closure, or after the
//! first error.

use crate::error::{ApiCallError, ApiResult, NetworkFailureKind};
use crate::http::handlers::{ResponseContext, ResponseHandler};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{BoxStream, FusedStream, Stream, StreamExt, TryStreamExt};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;

/// What a decoded frame means for the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStep<T> {
    /// Yield a value
    Item(T),
    /// Frame carries nothing for the caller (keep-alives, metadata)
    Skip,
    /// End marker; the stream finishes
    Done,
}

/// Framing failures
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended inside a frame ({0} bytes pending)")]
    Truncated(usize),

    #[error("invalid frame: {0}")]
    Invalid(String),
}

/// One server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Frames a `text/event-stream` body into [`SseEvent`]s
///
/// Events end at a blank line. `\n` and `\r\n` line endings are accepted.
/// Blocks holding only comments are skipped. Non-whitespace bytes left over at
/// end of stream are a [`FrameError::Truncated`].
#[derive(Debug, Clone, Default)]
pub struct SseCodec {
    scanned: usize,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of the next complete block (including its blank line), if any
    fn next_block(&mut self, src: &BytesMut) -> Option<usize> {
        let mut line_start = self.scanned;
        while let Some(offset) = src[line_start..].iter().position(|b| *b == b'\n') {
            let line_end = line_start + offset;
            let line = trim_cr(&src[line_start..line_end]);
            if line.is_empty() {
                self.scanned = 0;
                return Some(line_end + 1);
            }
            line_start = line_end + 1;
        }
        self.scanned = line_start;
        None
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_block(block: &[u8]) -> Result<Option<SseEvent>, FrameError> {
    let text = std::str::from_utf8(block)
        .map_err(|e| FrameError::Invalid(format!("event is not UTF-8: {}", e)))?;

    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut has_field = false;

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "retry" => event.retry = value.parse().ok(),
            _ => continue,
        }
        has_field = true;
    }

    if !has_field {
        return Ok(None);
    }
    event.data = data_lines.join("\n");
    Ok(Some(event))
}

impl Decoder for SseCodec {
    type Item = SseEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, FrameError> {
        while let Some(len) = self.next_block(src) {
            let block = src.split_to(len);
            if let Some(event) = parse_block(&block)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, FrameError> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            self.scanned = 0;
            return Ok(None);
        }
        let pending = src.len();
        src.clear();
        self.scanned = 0;
        Err(FrameError::Truncated(pending))
    }
}

/// Frames newline-delimited JSON into lines; blank lines are skipped
#[derive(Debug, Clone, Default)]
pub struct NdjsonCodec {
    scanned: usize,
}

impl NdjsonCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        while let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            let line = trim_cr(&line[..line.len() - 1]);
            let text = std::str::from_utf8(line)
                .map_err(|e| FrameError::Invalid(format!("line is not UTF-8: {}", e)))?
                .trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
        self.scanned = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        let rest = src.split();
        let text = std::str::from_utf8(&rest)
            .map_err(|e| FrameError::Invalid(format!("line is not UTF-8: {}", e)))?
            .trim();
        // An unterminated last line is still a frame; the mapper rejects partial JSON
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

/// A lazy, finite, non-restartable sequence of decoded stream items
///
/// Dropping or [`close`](EventStream::close)-ing the stream releases the
/// underlying connection. After an error or the end marker the stream is
/// exhausted.
pub struct EventStream<T> {
    inner: Option<BoxStream<'static, ApiResult<T>>>,
}

impl<T> EventStream<T> {
    /// Wrap any stream of results
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = ApiResult<T>> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
        }
    }

    /// A stream with no items
    pub fn empty() -> Self
    where
        T: Send + 'static,
    {
        Self::from_stream(futures::stream::empty())
    }

    /// Stop reading and release the connection
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("event stream closed by caller");
        }
    }

    /// Whether the stream has finished or was closed
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Map every item, keeping errors
    pub fn map_items<U, F>(self, f: F) -> EventStream<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        match self.inner {
            Some(inner) => EventStream::from_stream(inner.map_ok(f)),
            None => EventStream { inner: None },
        }
    }

    /// Drain the stream into a vector, stopping at the first error
    pub async fn collect_items(mut self) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T> Stream for EventStream<T> {
    type Item = ApiResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.inner = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T> FusedStream for EventStream<T> {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Response handler producing an [`EventStream`] from a framed body
#[derive(Debug, Clone)]
pub struct EventStreamHandler<C, F> {
    codec: C,
    map: F,
}

impl<C, F> EventStreamHandler<C, F> {
    /// Frame with `codec` and map each frame with `map`
    pub fn new(codec: C, map: F) -> Self {
        Self { codec, map }
    }
}

impl<F> EventStreamHandler<SseCodec, F> {
    /// Server-sent events
    pub fn sse(map: F) -> Self {
        Self::new(SseCodec::new(), map)
    }
}

impl<F> EventStreamHandler<NdjsonCodec, F> {
    /// Newline-delimited JSON
    pub fn ndjson(map: F) -> Self {
        Self::new(NdjsonCodec::new(), map)
    }
}

/// End marker used by OpenAI-compatible event streams
pub const DONE_MARKER: &str = "[DONE]";

type SseJsonMap<T> = fn(SseEvent) -> Result<StreamStep<T>, String>;

/// Server-sent events whose `data` is JSON `T`, ending at `data: [DONE]`
pub fn sse_json<T: DeserializeOwned>() -> EventStreamHandler<SseCodec, SseJsonMap<T>> {
    EventStreamHandler::sse(parse_sse_json::<T> as SseJsonMap<T>)
}

fn parse_sse_json<T: DeserializeOwned>(event: SseEvent) -> Result<StreamStep<T>, String> {
    let data = event.data.trim();
    if data == DONE_MARKER {
        return Ok(StreamStep::Done);
    }
    if data.is_empty() {
        return Ok(StreamStep::Skip);
    }
    serde_json::from_str(data)
        .map(StreamStep::Item)
        .map_err(|e| format!("invalid event data: {}", e))
}

fn frame_error(url: &str, err: FrameError) -> ApiCallError {
    match err {
        FrameError::Io(e) => ApiCallError::network(url, NetworkFailureKind::Body, e.to_string()),
        other => ApiCallError::decoding(url, other.to_string()),
    }
}

#[async_trait]
impl<C, F, T> ResponseHandler for EventStreamHandler<C, F>
where
    C: Decoder<Error = FrameError> + Clone + Send + Sync + 'static,
    C::Item: Send,
    F: Fn(C::Item) -> Result<StreamStep<T>, String> + Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = EventStream<T>;

    async fn handle(&self, response: Response, ctx: &ResponseContext) -> ApiResult<EventStream<T>> {
        let url = ctx.url.clone();
        let cancel = ctx.cancel.clone();
        let map = self.map.clone();

        let body = response.bytes_stream().map_err(io::Error::other);
        let mut frames = FramedRead::new(StreamReader::new(body), self.codec.clone());

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ApiCallError::Aborted),
                    next = frames.next() => Ok(next),
                };
                let frame = match next {
                    Err(aborted) => {
                        yield Err(aborted);
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        yield Err(frame_error(&url, e));
                        break;
                    }
                    Ok(Some(Ok(frame))) => frame,
                };
                match map(frame) {
                    Ok(StreamStep::Item(item)) => yield Ok(item),
                    Ok(StreamStep::Skip) => {}
                    Ok(StreamStep::Done) => break,
                    Err(message) => {
                        yield Err(ApiCallError::decoding(&url, message));
                        break;
                    }
                }
            }
        };

        Ok(EventStream::from_stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all<C: Decoder<Error = FrameError>>(
        codec: &mut C,
        input: &[u8],
    ) -> Result<Vec<C::Item>, FrameError> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf)? {
            out.push(item);
        }
        while let Some(item) = codec.decode_eof(&mut buf)? {
            out.push(item);
        }
        Ok(out)
    }

    #[test]
    fn test_sse_events_in_order() {
        let events = decode_all(
            &mut SseCodec::new(),
            b"data: one\n\n: keep-alive\n\nevent: delta\ndata: two\r\ndata: three\r\n\r\n",
        )
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].event.as_deref(), Some("delta"));
        assert_eq!(events[1].data, "two\nthree");
    }

    #[test]
    fn test_sse_split_across_chunks() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data: hel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\n");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().data, "hello");
    }

    #[test]
    fn test_sse_truncated_final_frame() {
        let result = decode_all(&mut SseCodec::new(), b"data: one\n\ndata: tw");
        assert!(matches!(result, Err(FrameError::Truncated(8))));

        let events = decode_all(&mut SseCodec::new(), b"data: one\n\n\n  ").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_ndjson_lines() {
        let lines = decode_all(&mut NdjsonCodec::new(), b"{\"a\":1}\r\n\n{\"a\":2}\n{\"a\":3}").unwrap();
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#]);
    }

    #[test]
    fn test_sse_json_mapping() {
        let event = |data: &str| SseEvent {
            data: data.to_string(),
            ..Default::default()
        };
        assert_eq!(
            parse_sse_json::<serde_json::Value>(event("[DONE]")),
            Ok(StreamStep::Done)
        );
        assert_eq!(
            parse_sse_json::<u32>(event("42")),
            Ok(StreamStep::Item(42))
        );
        assert!(parse_sse_json::<u32>(event("{")).is_err());
    }

    #[tokio::test]
    async fn test_event_stream_fuses_after_error() {
        let mut stream = EventStream::from_stream(futures::stream::iter(vec![
            Ok(1),
            Err(ApiCallError::decoding("u", "bad frame")),
            Ok(3),
        ]));

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_close_stops_stream() {
        let mut stream = EventStream::from_stream(futures::stream::iter(vec![Ok(1), Ok(2)]));
        stream.close();
        assert!(stream.next().await.is_none());
    }
}
