//! Text chunkers.
//!
//! Two splitting policies live here:
//!
//! - [`chunk_text`]: the ingestion chunker. Splits on whitespace into
//!   windows of `chunk_size` words, each sharing `overlap` words with its
//!   predecessor. Used for the local flat index.
//! - [`CharSplitter`]: a recursive character splitter used by the remote
//!   index, which re-chunks the concatenated documents itself before
//!   embedding. Tries paragraph, line, and word boundaries in that order
//!   and only hard-splits characters as a last resort.
//!
//! Both are pure: the same input always yields the same chunk sequence.

use crate::error::{RagError, Result};

/// Validated word-window parameters.
///
/// Invariant: `chunk_size > 0` and `overlap < chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Validate raw parameters.
    ///
    /// `chunk_size <= 0` and `overlap < 0` are rejected. An overlap that is
    /// not smaller than the chunk size is coerced to `chunk_size / 3`.
    pub fn new(chunk_size: i64, overlap: i64) -> Result<Self> {
        if chunk_size <= 0 {
            return Err(RagError::InvalidArgument(format!(
                "chunk_size must be > 0 (got {})",
                chunk_size
            )));
        }
        if overlap < 0 {
            return Err(RagError::InvalidArgument(format!(
                "overlap must be >= 0 (got {})",
                overlap
            )));
        }
        let chunk_size = chunk_size as usize;
        let mut overlap = overlap as usize;
        if overlap >= chunk_size {
            overlap = chunk_size / 3;
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Words the window advances between consecutive chunks.
    pub fn step(&self) -> usize {
        (self.chunk_size - self.overlap).max(1)
    }
}

/// Split text into overlapping word windows.
///
/// Empty (or whitespace-only) input yields no chunks.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let step = params.step();
    let mut chunks = Vec::with_capacity(words.len() / step + 1);

    let mut i = 0;
    while i < words.len() {
        let end = (i + params.chunk_size).min(words.len());
        chunks.push(words[i..end].join(" "));
        i += step;
    }

    chunks
}

/// Validate parameters and chunk in one call.
pub fn chunk_words(text: &str, chunk_size: i64, overlap: i64) -> Result<Vec<String>> {
    let params = ChunkParams::new(chunk_size, overlap)?;
    Ok(chunk_text(text, &params))
}

/// Boundaries tried in order; the empty separator splits between characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive character splitter with a character budget and overlap.
#[derive(Debug, Clone)]
pub struct CharSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl CharSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidArgument(
                "splitter chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidArgument(format!(
                "splitter chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the coarsest separator that actually occurs.
        let (idx, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(**s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let finer = &separators[(idx + 1).min(separators.len())..];

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut out = Vec::new();
        let mut fitting: Vec<String> = Vec::new();
        for piece in pieces {
            if char_len(&piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                out.push(piece);
            } else {
                out.extend(self.split_with(&piece, finer));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting, separator));
        }
        out
    }

    /// Greedily pack pieces into chunks, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joined = if window.is_empty() { 0 } else { sep_len };
            if total + len + joined > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window, separator);
                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
                }
            }
            let joined = if window.is_empty() { 0 } else { sep_len };
            window.push_back(piece);
            total += len + joined;
        }
        push_joined(&mut docs, &window, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &std::collections::VecDeque<&str>, sep: &str) {
    let doc = window.iter().copied().collect::<Vec<_>>().join(sep);
    let doc = doc.trim();
    if !doc.is_empty() {
        docs.push(doc.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
