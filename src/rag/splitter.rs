//! Recursive character splitter.
//!
//! Text is cut on the coarsest separator present (`"\n\n"`, then `"\n"`, then
//! `" "`, then single characters) and the pieces are merged back greedily into
//! chunks of at most `chunk_size` characters, with up to `chunk_overlap`
//! characters carried from one chunk into the next.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::config::settings::ChunkingSettings;
use crate::core::errors::RagError;
use crate::tools::fetch::PageContent;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A text chunk with source information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// URL of the page the chunk came from.
    pub source: String,
    /// Chunk index within the source
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::BadRequest(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::BadRequest(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self, RagError> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Splits every page's paragraphs (joined by newlines) and tags each
    /// chunk with its page URL.
    pub fn split_pages(&self, pages: &[PageContent]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            if page.is_empty() {
                continue;
            }
            let text = page.paragraphs.join("\n");
            for (chunk_index, piece) in self.split_text(&text).into_iter().enumerate() {
                chunks.push(TextChunk {
                    text: piece,
                    source: page.url.clone(),
                    chunk_index,
                });
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let splits: Vec<&str> = if separator.is_empty() {
            split_chars(text)
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits, separator));
                good_splits.clear();
            }
            if remaining.is_empty() {
                if let Some(chunk) = clean(split) {
                    final_chunks.push(chunk);
                }
            } else {
                final_chunks.extend(self.split_recursive(split, remaining));
            }
        }
        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, separator));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { separator_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_pieces(&current, separator) {
                    docs.push(doc);
                }

                while let Some(first) = current.front() {
                    let joiner = if current.is_empty() { 0 } else { separator_len };
                    let over_overlap = total > self.chunk_overlap;
                    let still_too_long = total + len + joiner > self.chunk_size && total > 0;
                    if !(over_overlap || still_too_long) {
                        break;
                    }
                    let dropped = char_len(first) + if current.len() > 1 { separator_len } else { 0 };
                    total = total.saturating_sub(dropped);
                    current.pop_front();
                }
            }

            let joiner = if current.is_empty() { 0 } else { separator_len };
            current.push_back(split);
            total += len + joiner;
        }

        if let Some(doc) = join_pieces(&current, separator) {
            docs.push(doc);
        }
        docs
    }
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(start, c)| &text[start..start + c.len_utf8()])
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn join_pieces(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    clean(&joined)
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_words_with_overlap() {
        let splitter = TextSplitter::new(10, 3).expect("valid splitter");
        let chunks = splitter.split_text("aaa bbb ccc ddd eee");
        assert_eq!(chunks, vec!["aaa bbb", "bbb ccc", "ccc ddd", "ddd eee"]);
    }

    #[test]
    fn falls_back_to_finer_separators_for_long_pieces() {
        let splitter = TextSplitter::new(10, 0).expect("valid splitter");
        let chunks = splitter.split_text("short\n\nthis is a longer paragraph");
        assert_eq!(chunks, vec!["short", "this is a", "longer", "paragraph"]);
    }

    #[test]
    fn splits_unbroken_text_by_characters() {
        let splitter = TextSplitter::new(4, 1).expect("valid splitter");
        let chunks = splitter.split_text("abcdefghij");
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.first().map(String::as_str), Some("abcd"));
        // Each chunk starts with the last character of the previous one.
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].chars().last(), pair[1].chars().next());
        }
    }

    #[test]
    fn short_text_is_a_single_trimmed_chunk() {
        let splitter = TextSplitter::new(1000, 200).expect("valid splitter");
        assert_eq!(splitter.split_text("  hello world \n"), vec!["hello world"]);
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn default_sized_chunks_respect_limits() {
        let splitter = TextSplitter::new(1000, 200).expect("valid splitter");
        let paragraph = "Rust is a multi-paradigm programming language. ".repeat(12);
        let text = vec![paragraph; 8].join("\n");
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let splitter = TextSplitter::new(3, 1).expect("valid splitter");
        let chunks = splitter.split_text("日本語テキスト");
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
        assert_eq!(chunks[0], "日本語");
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(100, 150).is_err());
    }

    #[test]
    fn pages_are_tagged_with_source_and_index() {
        let splitter = TextSplitter::new(20, 5).expect("valid splitter");
        let pages = vec![
            PageContent {
                url: "https://a.example".to_string(),
                paragraphs: vec!["first paragraph".to_string(), "second paragraph".to_string()],
            },
            PageContent {
                url: "https://empty.example".to_string(),
                paragraphs: Vec::new(),
            },
            PageContent {
                url: "https://b.example".to_string(),
                paragraphs: vec!["only one".to_string()],
            },
        ];

        let chunks = splitter.split_pages(&pages);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "first paragraph");
        assert_eq!(chunks[1].text, "second paragraph");
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[2].source, "https://b.example");
        assert_eq!(chunks[2].chunk_index, 0);
        assert!(chunks.iter().all(|c| c.source != "https://empty.example"));
    }
}
