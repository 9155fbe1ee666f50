// WHY: Splits a document into bounded segments that end on sentence boundaries when possible
// Chunk indices must be reproducible across runs since checkpoints refer to them

use crate::error::{RedactError, Result};
use tracing::debug;

/// Default chunk size in characters
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// Default number of characters searched backward for a sentence end
pub const DEFAULT_LOOKBACK_CHARS: usize = 200;

/// 0-based byte position in source text
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct BytePos(pub usize);

impl From<BytePos> for usize {
    fn from(pos: BytePos) -> Self {
        pos.0
    }
}

/// Rules for where a chunk may be cut
#[derive(Debug, Clone)]
pub struct ChunkRules {
    /// Maximum chunk length in characters
    pub max_chars: usize,
    /// How far back from the hard cut to look for a sentence end
    pub lookback_chars: usize,
    /// Punctuation that ends a sentence when followed by whitespace
    pub end_punctuation: Vec<char>,
}

impl Default for ChunkRules {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            lookback_chars: DEFAULT_LOOKBACK_CHARS,
            end_punctuation: vec!['.', '!', '?'],
        }
    }
}

/// Bounded, ordered segment of the source document, borrowed from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub text: &'a str,
    pub start: BytePos,
    /// True when the chunk was cut right after sentence-ending punctuation
    /// or runs to the end of the document
    pub boundary_is_sentence_end: bool,
}

impl Chunk<'_> {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    rules: ChunkRules,
}

impl Chunker {
    pub fn new(rules: ChunkRules) -> Result<Self> {
        if rules.max_chars == 0 {
            return Err(RedactError::Config("chunk size must be at least 1 character".into()));
        }
        Ok(Self { rules })
    }

    pub fn with_max_chars(max_chars: usize) -> Result<Self> {
        Self::new(ChunkRules {
            max_chars,
            ..ChunkRules::default()
        })
    }

    pub fn rules(&self) -> &ChunkRules {
        &self.rules
    }

    /// Lazily split `text` into chunks. Calling this again on the same text
    /// yields the same chunks, so a resumed run can `skip` what it already did.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'_, 'a> {
        Chunks {
            rules: &self.rules,
            text,
            cursor: 0,
            index: 0,
        }
    }

    /// Number of chunks `text` splits into
    pub fn count(&self, text: &str) -> usize {
        self.chunks(text).count()
    }
}

/// Iterator over the chunks of a document
pub struct Chunks<'r, 'a> {
    rules: &'r ChunkRules,
    text: &'a str,
    cursor: usize,
    index: usize,
}

impl Chunks<'_, '_> {
    /// Byte offset just after the last sentence end within the lookback
    /// window of `hard_end`, if any
    fn sentence_cut(&self, hard_end: usize) -> Option<usize> {
        let window = &self.text[self.cursor..hard_end];
        let mut next_char = self.text[hard_end..].chars().next();
        let mut cut = hard_end;

        for (steps, (offset, ch)) in window.char_indices().rev().enumerate() {
            if steps >= self.rules.lookback_chars {
                break;
            }
            if self.rules.end_punctuation.contains(&ch) && next_char.is_some_and(char::is_whitespace) {
                return Some(cut);
            }
            next_char = Some(ch);
            cut = self.cursor + offset;
        }
        None
    }
}

impl<'a> Iterator for Chunks<'_, 'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.text.len() {
            return None;
        }

        let rest = &self.text[self.cursor..];
        let (end, boundary_is_sentence_end) = match rest.char_indices().nth(self.rules.max_chars) {
            None => (self.text.len(), true),
            Some((offset, _)) => {
                let hard_end = self.cursor + offset;
                match self.sentence_cut(hard_end) {
                    Some(cut) => (cut, true),
                    None => {
                        debug!(chunk = self.index, "No sentence boundary in lookback window, cutting at hard offset");
                        (hard_end, false)
                    }
                }
            }
        };

        let chunk = Chunk {
            index: self.index,
            text: &self.text[self.cursor..end],
            start: BytePos(self.cursor),
            boundary_is_sentence_end,
        };
        self.cursor = end;
        self.index += 1;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_, '_> {}

/// Convenience wrapper: split with default rules and the given size
pub fn chunk(text: &str, max_chars: usize) -> Result<Vec<Chunk<'_>>> {
    let chunker = Chunker::with_max_chars(max_chars)?;
    Ok(chunker.chunks(text).collect())
}
