//! Recursive character text splitter
//!
//! Text is split on the first separator that occurs in it; pieces that are
//! still too long are split again with the remaining separators. Adjacent
//! small pieces are then merged back into chunks of at most `chunk_size`
//! characters, carrying up to `chunk_overlap` characters into the next chunk.

use super::schemas::{ChunkMetadata, DocumentChunk, DocumentSource, PageText};
use tracing::info;

pub const TEXT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size),
            separators: TEXT_SEPARATORS.to_vec(),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let mut chunks = Vec::new();

        let (separator, remaining) = match separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
        {
            Some(i) => (separators[i], &separators[i + 1..]),
            None => ("", &[][..]),
        };

        let mut small: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&mut chunks, &current);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    let Some(first) = current.first() else { break };
                    total -= char_len(first);
                    current.remove(0);
                }
            }
            current.push(piece);
            total += len;
        }

        push_joined(&mut chunks, &current);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, pieces: &[&str]) {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`, leaving the separator attached to the end of the
/// preceding piece. An empty separator splits into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split_inclusive(separator).filter(|s| !s.is_empty()).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split every page of a document and attach chunk metadata. Chunk indices
/// run across the whole document.
pub fn split_pages(pages: &[PageText], source: &DocumentSource) -> Vec<DocumentChunk> {
    let splitter = TextSplitter::new(source.chunk_size, source.chunk_overlap);
    let mut chunk_index = 0u32;

    let chunks: Vec<DocumentChunk> = pages
        .iter()
        .flat_map(|page| {
            splitter
                .split_text(&page.text)
                .into_iter()
                .map(move |content| (page.page_number, content))
        })
        .map(|(page_number, content)| {
            let metadata = ChunkMetadata::for_source(source, page_number, chunk_index);
            chunk_index += 1;
            DocumentChunk { content, metadata }
        })
        .collect();

    info!(
        document = source.key,
        pages = pages.len(),
        chunks = chunks.len(),
        "Document split"
    );
    chunks
}
