//! Token estimation and overlapping chunking.
//!
//! Token counts here are a character-based heuristic, not a tokenizer.
//! Callers must treat them as approximate.

use crate::errors::{EmbeddingError, Result};

/// Characters per token used when converting chunk sizes to characters.
pub const CHARS_PER_TOKEN: usize = 4;
/// Token limit for models registered without one.
pub const DEFAULT_MAX_TOKENS: usize = 512;
/// Default chunk window, in tokens.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default overlap between consecutive chunks, in tokens.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Estimate the token count of `text` as `round(chars / 6 * 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    ((chars as f64 / 6.0) * 1.3).round() as usize
}

/// Whether the estimated token count of `text` fits within `max_tokens`.
pub fn validate_length(text: &str, max_tokens: usize) -> bool {
    estimate_tokens(text) <= max_tokens
}

/// One window of a chunked document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk<'a> {
    /// Position of the chunk in the sequence, from 0.
    pub index: usize,
    /// Offset of the first character, counted in characters.
    pub char_offset: usize,
    /// The chunk text.
    pub text: &'a str,
}

/// Split `text` into windows of `chunk_size` tokens overlapping by `overlap`.
///
/// Fails with [`EmbeddingError::InvalidArgument`] when `chunk_size` is zero
/// or `overlap >= chunk_size`; such a window would never advance.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<TextChunks<'_>> {
    if chunk_size == 0 {
        return Err(EmbeddingError::InvalidArgument(
            "chunk size must be positive".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(EmbeddingError::InvalidArgument(format!(
            "overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
        )));
    }
    Ok(TextChunks::new(
        text,
        chunk_size * CHARS_PER_TOKEN,
        (chunk_size - overlap) * CHARS_PER_TOKEN,
    ))
}

/// Lazy, restartable iterator over the chunks of a document.
///
/// Cloning the iterator, or calling [`TextChunks::restart`], replays the
/// sequence from the first chunk.
#[derive(Clone, Debug)]
pub struct TextChunks<'a> {
    text: &'a str,
    // Byte offset of every char, plus `text.len()` as a sentinel.
    boundaries: Vec<usize>,
    window: usize,
    step: usize,
    next_start: usize,
    index: usize,
    done: bool,
}

impl<'a> TextChunks<'a> {
    fn new(text: &'a str, window: usize, step: usize) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Self {
            text,
            boundaries,
            window,
            step,
            next_start: 0,
            index: 0,
            done: false,
        }
    }

    /// Rewind to the first chunk.
    pub fn restart(&mut self) {
        self.next_start = 0;
        self.index = 0;
        self.done = false;
    }

    /// Window size in characters.
    pub fn window_chars(&self) -> usize {
        self.window
    }

    /// Characters shared by consecutive chunks.
    pub fn overlap_chars(&self) -> usize {
        self.window - self.step
    }

    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl<'a> Iterator for TextChunks<'a> {
    type Item = TextChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.char_len();
        if self.done || self.next_start >= len {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.window).min(len);
        let chunk = TextChunk {
            index: self.index,
            char_offset: start,
            text: &self.text[self.boundaries[start]..self.boundaries[end]],
        };
        if end >= len {
            self.done = true;
        } else {
            self.next_start = start + self.step;
        }
        self.index += 1;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for TextChunks<'_> {}
