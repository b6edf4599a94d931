//! Overlapping, boundary-aware text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most
//! `max_chunk_size` characters, where each chunk after the first starts
//! `overlap` characters before the previous chunk's end.
//!
//! # Algorithm
//!
//! 1. From the current start, the hard limit is `start + max_chunk_size`
//!    characters. If the rest of the text fits, it becomes the final chunk.
//! 2. Otherwise look backwards through the last `boundary_window` characters
//!    before the hard limit for, in order of preference: a paragraph break
//!    (`\n\n`), a line break, a sentence end (`.`, `!` or `?` followed by
//!    whitespace), a space.
//! 3. End the chunk just after the best boundary found, or at the hard limit
//!    when there is none.
//! 4. Start the next chunk `overlap` characters before that end.
//!
//! Sizes are counted in `char`s; [`Chunk::start`]/[`Chunk::end`] are byte
//! offsets into the text, and `chunk.text == text[start..end]`. Dropping the
//! overlapping prefix of every chunk after the first and concatenating
//! reproduces the input exactly.
//!
//! The boundary search never reaches into the overlap region, so every chunk
//! contributes at least one new character and the sequence always terminates.
//!
//! # Example
//!
//! ```rust
//! use askdoc::chunk::{ChunkConfig, Chunker};
//!
//! let chunker = Chunker::new(ChunkConfig::new(400, 50)).unwrap();
//! let text = "x".repeat(1000);
//! let spans: Vec<_> = chunker.chunks("doc", &text).map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 400), (350, 750), (700, 1000)]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Chunking parameters, validated by [`Chunker::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// How far back from the hard limit to look for a natural boundary.
    /// Defaults to a fifth of `max_chunk_size`.
    pub boundary_window: Option<usize>,
}

impl ChunkConfig {
    pub fn new(max_chunk_size: usize, overlap: usize) -> Self {
        Self {
            max_chunk_size,
            overlap,
            boundary_window: None,
        }
    }

    /// Size the chunks by document length: short documents get large chunks,
    /// long documents get small ones, always with 15% overlap.
    pub fn adaptive(text_chars: usize) -> Self {
        let max_chunk_size = if text_chars < 2_000 {
            1_000
        } else if text_chars < 10_000 {
            700
        } else {
            400
        };
        Self::new(max_chunk_size, max_chunk_size * 15 / 100)
    }

    /// Reject sizes that cannot make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "max_chunk_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }

    fn window(&self) -> usize {
        self.boundary_window
            .unwrap_or(self.max_chunk_size / 5)
            .min(self.max_chunk_size)
    }
}

/// A validated chunker. Cheap to copy; holds no text.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Build a chunker, failing with [`RagError::InvalidConfig`] when
    /// `max_chunk_size == 0` or `overlap >= max_chunk_size`.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Lazily split `text` into chunks owned by `document_id`.
    ///
    /// Every call re-derives the same boundaries from the same input.
    pub fn chunks<'a>(&self, document_id: &'a str, text: &'a str) -> Chunks<'a> {
        Chunks {
            config: self.config,
            document_id,
            text,
            next_start: if text.is_empty() { None } else { Some(0) },
            index: 0,
        }
    }
}

/// Iterator over the chunks of one text. See [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    config: ChunkConfig,
    document_id: &'a str,
    text: &'a str,
    next_start: Option<usize>,
    index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let max = self.config.max_chunk_size;
        let rest = &self.text[start..];

        // One more char than fits tells us whether the rest overflows.
        let window: Vec<(usize, char)> = rest.char_indices().take(max + 1).collect();
        if window.len() <= max {
            self.next_start = None;
            return Some(self.emit(start, self.text.len()));
        }

        let end_chars = find_boundary(&window, max, self.config.overlap, self.config.window())
            .unwrap_or(max);
        let end = start + window[end_chars].0;
        let next = start + window[end_chars - self.config.overlap].0;
        self.next_start = Some(next);
        Some(self.emit(start, end))
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

impl Chunks<'_> {
    fn emit(&mut self, start: usize, end: usize) -> Chunk {
        let chunk = make_chunk(self.document_id, self.index, start, end, self.text);
        self.index += 1;
        chunk
    }
}

/// Find the preferred cut point, as a char count from the chunk start.
///
/// `chars` holds at least `max + 1` entries. Candidates `p` satisfy
/// `overlap < p <= max` and lie inside the boundary window.
fn find_boundary(chars: &[(usize, char)], max: usize, overlap: usize, window: usize) -> Option<usize> {
    let lowest = max.saturating_sub(window).max(overlap + 1).max(1);
    if lowest > max {
        return None;
    }
    let at = |i: usize| chars[i].1;

    let paragraph = (lowest.max(2)..=max)
        .rev()
        .find(|&p| at(p - 1) == '\n' && at(p - 2) == '\n');
    if paragraph.is_some() {
        return paragraph;
    }

    let line = (lowest..=max).rev().find(|&p| at(p - 1) == '\n');
    if line.is_some() {
        return line;
    }

    let sentence = (lowest.max(2)..=max)
        .rev()
        .find(|&p| at(p - 1).is_whitespace() && matches!(at(p - 2), '.' | '!' | '?'));
    if sentence.is_some() {
        return sentence;
    }

    (lowest..=max).rev().find(|&p| at(p - 1) == ' ')
}

/// Create a single [`Chunk`] with a deterministic id and SHA-256 content hash.
fn make_chunk(document_id: &str, index: usize, start: usize, end: usize, text: &str) -> Chunk {
    let body = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}_{}", document_id, index),
        document_id: document_id.to_string(),
        index,
        start,
        end,
        text: body.to_string(),
        hash,
        embedding: None,
    }
}

/// Rebuild the source text from its chunks by dropping each overlap.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.push_str(&chunk.text[skip.min(chunk.text.len())..]);
        covered = chunk.end;
    }
    out
}
