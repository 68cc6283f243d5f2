//! Line framing and chunk decoding for provider streams.
//!
//! Network reads do not line up with record boundaries: one read may carry
//! several records, half a record, or split a multi-byte character. Bytes are
//! buffered until a `\n` arrives and only whole lines are decoded.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use super::StreamChunk;
use crate::error::{StreamDecodeError, TransportError, TransportResult};

/// Raw byte stream handed over by a provider transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

/// Lazily decoded chunk stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = TransportResult<StreamChunk>> + Send>>;

/// Longest line accepted by default, terminator excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Accumulates bytes and hands back complete lines.
///
/// Lines longer than the configured limit are dropped whole, however the
/// reads split them.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a terminator.
    scanned: usize,
    max_line: usize,
    /// Inside an oversized line whose head was already dropped.
    discarding: bool,
    dropped: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer that drops lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
            dropped: 0,
        }
    }

    /// Append `bytes` and drain every complete line, without its terminator.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else if end - start > self.max_line {
                self.drop_line(end - start);
            } else {
                let mut line = &self.buffer[start..end];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                lines.push(line.to_vec());
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                self.drop_line(self.buffer.len());
                self.discarding = true;
            }
            self.buffer.clear();
            self.scanned = 0;
        }

        lines
    }

    /// Take whatever is left once the input has ended.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let rest = mem::take(&mut self.buffer);
        self.scanned = 0;
        if mem::take(&mut self.discarding) || rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }

    /// Bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of oversized lines dropped since the last call.
    pub fn take_dropped(&mut self) -> usize {
        mem::take(&mut self.dropped)
    }

    fn drop_line(&mut self, seen: usize) {
        self.dropped += 1;
        warn!(
            bytes = seen,
            max_line = self.max_line,
            "Dropping oversized stream line"
        );
    }
}

/// Decode one line into a chunk.
///
/// Blank lines, comments, non-data SSE fields and `[DONE]` yield `Ok(None)`.
pub fn decode_line(line: &[u8]) -> Result<Option<StreamChunk>, StreamDecodeError> {
    let text = std::str::from_utf8(line)?;
    let trimmed = text.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(None);
    }

    let Some(payload) = trimmed.strip_prefix("data:") else {
        if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| trimmed.starts_with(field))
        {
            return Ok(None);
        }
        return Err(StreamDecodeError::MissingPrefix {
            line: trimmed.to_string(),
        });
    };

    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(payload)?))
}

/// Push-style decoder: feed network reads, get chunks back.
///
/// Malformed lines are logged and dropped. Once a terminal chunk is decoded
/// everything after it is ignored.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    lines: LineBuffer,
    finished: bool,
    skipped: usize,
}

impl ChunkDecoder {
    /// Create a fresh decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that drops lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            lines: LineBuffer::with_max_line(max_line),
            ..Self::default()
        }
    }

    /// Decode every complete line in `bytes`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        let lines = self.lines.feed(bytes);
        self.skipped += self.lines.take_dropped();
        self.decode_lines(lines)
    }

    /// Decode a trailing unterminated line once the input has ended.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        let rest = self.lines.flush().into_iter().collect();
        self.decode_lines(rest)
    }

    /// Whether a terminal chunk has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of lines dropped as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_lines(&mut self, lines: Vec<Vec<u8>>) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();

        for line in lines {
            match decode_line(&line) {
                Ok(Some(chunk)) => {
                    let terminal = chunk.is_terminal();
                    chunks.push(chunk);
                    if terminal {
                        self.finished = true;
                        let pending = self.lines.pending();
                        if pending > 0 {
                            debug!(pending_bytes = pending, "Discarding input after terminal chunk");
                        }
                        self.lines = LineBuffer::with_max_line(self.lines.max_line);
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "Skipping malformed stream line"
                    );
                }
            }
        }

        chunks
    }
}

struct DecodeState {
    source: ByteStream,
    decoder: ChunkDecoder,
    pending: VecDeque<TransportResult<StreamChunk>>,
    source_done: bool,
}

/// Wrap a byte stream into a lazy, single-pass chunk stream.
///
/// The next network read is only requested once every chunk decoded from
/// the previous one has been taken, so at most one read is held in memory.
/// The stream ends right after a terminal chunk without reading further.
pub fn decode_stream<S>(source: S) -> ChunkStream
where
    S: Stream<Item = TransportResult<Bytes>> + Send + 'static,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: ChunkDecoder::new(),
        pending: VecDeque::new(),
        source_done: false,
    };

    let chunks = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }

            if state.source_done || state.decoder.is_finished() {
                return None;
            }

            match state.source.next().await {
                Some(Ok(bytes)) => {
                    state
                        .pending
                        .extend(state.decoder.push(&bytes).into_iter().map(Ok));
                }
                Some(Err(e)) => {
                    state.source_done = true;
                    state.pending.push_back(Err(match e {
                        TransportError::Http(inner) => TransportError::Stream {
                            message: inner.to_string(),
                        },
                        other => other,
                    }));
                }
                None => {
                    state.source_done = true;
                    state
                        .pending
                        .extend(state.decoder.finish().into_iter().map(Ok));
                }
            }
        }
    });

    Box::pin(chunks)
}
