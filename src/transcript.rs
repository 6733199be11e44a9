//! Transcript batching
//!
//! Speech recognition hands over finished phrases one at a time. The
//! backend wants them in chunks, one per transcription interval, so
//! [`TranscriptBatcher`] buffers phrases until the owner flushes it. The
//! owner flushes on every interval tick and once more when capture stops.

/// Buffers recognized text between flushes
#[derive(Debug, Clone, Default)]
pub struct TranscriptBatcher {
    buffer: String,
    sent: String,
    chunks: usize,
}

impl TranscriptBatcher {
    /// Creates an empty batcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished phrase
    ///
    /// Blank phrases are ignored.
    pub fn push(&mut self, phrase: &str) {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return;
        }
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(phrase);
    }

    /// Text waiting for the next flush
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Everything flushed so far, joined with spaces
    pub fn transcript(&self) -> &str {
        &self.sent
    }

    /// Number of chunks flushed so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Takes the buffered text as one chunk
    ///
    /// # Returns
    ///
    /// The chunk, or `None` when nothing but whitespace was buffered
    pub fn flush(&mut self) -> Option<String> {
        let chunk = std::mem::take(&mut self.buffer);
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return None;
        }

        if !self.sent.is_empty() {
            self.sent.push(' ');
        }
        self.sent.push_str(chunk);
        self.chunks += 1;
        Some(chunk.to_owned())
    }
}
