use std::time::{Duration, Instant};

use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Render batching for streamed console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Minimum spacing between two flushes.
    pub window: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(500),
        }
    }
}

/// Text to append to the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub text: String,
    /// All input has been flushed; the stream is over.
    pub complete: bool,
}

/// Coalesces streamed text into time-boxed batches.
///
/// At most one flush is outstanding at a time. The caller owns the timer:
/// `push` and `end` return the delay after which `flush` must be called.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    policy: FlushPolicy,
    pending: String,
    last_flush: Option<Instant>,
    flush_scheduled: bool,
    ended: bool,
    complete: bool,
    live: bool,
}

impl LogBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            pending: String::new(),
            last_flush: None,
            flush_scheduled: false,
            ended: false,
            complete: false,
            live: true,
        }
    }

    /// Appends a chunk. Returns the flush delay when this call scheduled one.
    pub fn push(&mut self, chunk: &str, now: Instant) -> Option<Duration> {
        if !self.live || self.ended {
            return None;
        }
        self.pending.push_str(chunk);
        self.schedule(self.delay(now))
    }

    /// Marks end of stream. Completion is surfaced by the flush that drains
    /// the remaining pending text; if none is scheduled, one is scheduled now.
    pub fn end(&mut self) -> Option<Duration> {
        if !self.live || self.ended {
            return None;
        }
        self.ended = true;
        self.schedule(Duration::ZERO)
    }

    /// Drains pending text. Returns `None` after an abort or when no flush
    /// was scheduled, so a stale timer never touches the display.
    pub fn flush(&mut self, now: Instant) -> Option<Flush> {
        if !self.live || !self.flush_scheduled {
            return None;
        }
        self.flush_scheduled = false;
        self.last_flush = Some(now);
        self.complete = self.ended;
        Some(Flush {
            text: std::mem::take(&mut self.pending),
            complete: self.complete,
        })
    }

    /// Stops the session: pending text is discarded and no further flush
    /// produces output.
    pub fn abort(&mut self) {
        self.live = false;
        self.flush_scheduled = false;
        self.pending.clear();
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    fn delay(&self, now: Instant) -> Duration {
        match self.last_flush {
            None => Duration::ZERO,
            Some(last) => self
                .policy
                .window
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    fn schedule(&mut self, delay: Duration) -> Option<Duration> {
        if self.flush_scheduled {
            return None;
        }
        self.flush_scheduled = true;
        Some(delay)
    }
}

/// Incremental UTF-8 decoding of a byte stream; a character split across two
/// chunks is emitted once both halves have arrived.
pub struct StreamDecoder {
    decoder: Decoder,
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder").finish_non_exhaustive()
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder_without_bom_handling(),
        }
    }

    /// Decodes the next chunk. Pass `last = true` once, with the final
    /// chunk (possibly empty), to flush a dangling partial character.
    pub fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len().saturating_mul(3));
        let mut out = String::with_capacity(capacity);
        let mut input = bytes;
        loop {
            let (result, read, _replaced) = self.decoder.decode_to_string(input, &mut out, last);
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => out.reserve(input.len().saturating_mul(3).max(4)),
            }
        }
        out
    }
}
