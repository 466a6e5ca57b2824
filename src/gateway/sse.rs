//! Incremental `text/event-stream` decoding.

use futures_core::Stream;
use futures_util::StreamExt;

use super::{GatewayError, ReplyStream};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw body chunks and yields complete events.
///
/// Lines may be split across network chunks; partial lines are buffered until
/// their terminator arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Dispatch whatever is pending once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.feed_line(&line);
        }
        self.dispatch()
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

/// Provider-specific meaning of one event
pub enum Frame {
    Text(String),
    /// Completion signal; the reply is whole
    Done,
    Skip,
}

/// Turn a streamed response body into reply chunks using `parse`.
///
/// A body that ends before `parse` reports [`Frame::Done`] yields a decode
/// error, so truncated replies are never mistaken for complete ones.
pub fn reply_stream<S, B, F>(body: S, mut parse: F) -> ReplyStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: FnMut(&SseEvent) -> Result<Frame, GatewayError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();
        loop {
            let (events, ended) = match body.next().await {
                Some(Ok(chunk)) => (decoder.push(chunk.as_ref()), false),
                Some(Err(err)) => {
                    yield Err(GatewayError::from(err));
                    return;
                }
                None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
            };
            for event in events {
                match parse(&event) {
                    Ok(Frame::Text(text)) => yield Ok(text),
                    Ok(Frame::Done) => return,
                    Ok(Frame::Skip) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            if ended {
                yield Err(GatewayError::Decode(
                    "stream ended before the completion signal".to_string(),
                ));
                return;
            }
        }
    })
}
