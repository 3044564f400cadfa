//! Append-only chunk accumulator with sentence extraction.
//!
//! Owned by a single stream; deliberately not thread-safe.

use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_MAX_UNPROCESSED: usize = 4096;

lazy_static! {
    static ref SENTENCE_BOUNDARY: Regex = Regex::new(r"[.!?]+(\s|$)").unwrap();
    /// "More PII may follow": trailing digit runs, separators, a dangling
    /// local-part, or a capitalized name pair cut mid-word.
    static ref SENSITIVE_TAIL: Regex =
        Regex::new(r"(\d{3,}[-\s]?|\d{2,}[-/]|\w+@|[A-Z][a-z]+ [A-Z])$").unwrap();
}

/// True when the end of `text` looks like a sensitive span cut short.
pub fn tail_may_contain_sensitive(text: &str) -> bool {
    SENSITIVE_TAIL.is_match(text)
}

#[derive(Debug)]
pub struct ChunkBuffer {
    buf: String,
    processed_up_to: usize,
    max_unprocessed: usize,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNPROCESSED)
    }
}

impl ChunkBuffer {
    pub fn new(max_unprocessed: usize) -> Self {
        Self {
            buf: String::new(),
            processed_up_to: 0,
            max_unprocessed: max_unprocessed.max(1),
        }
    }

    pub fn append(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Everything accumulated since the stream started.
    pub fn accumulated(&self) -> &str {
        &self.buf
    }

    /// Text past the watermark that has not been sentence-validated yet.
    pub fn unprocessed(&self) -> &str {
        &self.buf[self.processed_up_to..]
    }

    /// Extract the next complete sentence past the watermark, advancing it.
    ///
    /// When the unprocessed region has grown beyond the configured maximum
    /// without a sentence boundary, everything unprocessed is force-extracted
    /// so validation cannot be starved by boundary-free output.
    pub fn try_extract_sentence(&mut self) -> Option<String> {
        let unprocessed = &self.buf[self.processed_up_to..];
        if unprocessed.is_empty() {
            return None;
        }

        if let Some(m) = SENTENCE_BOUNDARY.find(unprocessed) {
            let sentence = unprocessed[..m.end()].to_string();
            self.processed_up_to += m.end();
            return Some(sentence);
        }

        if unprocessed.len() > self.max_unprocessed {
            let forced = unprocessed.to_string();
            self.processed_up_to = self.buf.len();
            return Some(forced);
        }

        None
    }

    /// Tail heuristic over the accumulated output.
    pub fn may_contain_incomplete_sensitive(&self) -> bool {
        tail_may_contain_sensitive(&self.buf)
    }
}
