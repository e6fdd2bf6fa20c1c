//! Retrieval context builder.
//!
//! Turns index hits into the passages handed to the model:
//! 1. Keep the `search_k` best hits, then the first `top_k` of those
//! 2. Walk them in rank order under a word budget, stopping at the first
//!    chunk that would overflow it
//! 3. Expose the surviving chunks with their sources for citation

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use super::store::{ChunkSearchResult, StoredChunk, VectorIndex};
use crate::core::config::settings::RetrievalSettings;

/// A chunk with its computed relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

impl From<ChunkSearchResult> for ScoredChunk {
    fn from(result: ChunkSearchResult) -> Self {
        Self {
            chunk: result.chunk,
            score: result.score,
        }
    }
}

/// The budgeted passages selected for one query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub query: String,
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Unique chunk sources in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .filter(|sc| seen.insert(sc.chunk.source.as_str()))
            .map(|sc| sc.chunk.source.clone())
            .collect()
    }

    pub fn word_count(&self) -> usize {
        self.chunks.iter().map(|sc| sc.chunk.word_count()).sum()
    }

    /// Numbered passages with citations, for display.
    pub fn format_context(&self) -> String {
        let mut context = String::new();
        for (i, sc) in self.chunks.iter().enumerate() {
            context.push_str(&format!(
                "[{}] (Source: {}, relevance: {:.2})\n{}\n\n",
                i + 1,
                sc.chunk.source,
                sc.score,
                sc.chunk.content
            ));
        }
        context.trim().to_string()
    }
}

pub struct ContextBuilder {
    config: RetrievalSettings,
}

impl ContextBuilder {
    pub fn new(config: RetrievalSettings) -> Self {
        Self { config }
    }

    /// How many hits to request from the index.
    pub fn search_k(&self) -> usize {
        self.config.search_k
    }

    /// Build context from similarity hits already ordered best first.
    pub fn build_context(&self, query: &str, hits: Vec<ChunkSearchResult>) -> RetrievedContext {
        let ranked = hits
            .into_iter()
            .take(self.config.search_k)
            .map(ScoredChunk::from)
            .collect();
        self.select(query, ranked)
    }

    /// Build context using keyword overlap (fallback when the query cannot be embedded).
    pub fn build_context_keyword(&self, query: &str, index: &VectorIndex) -> RetrievedContext {
        let query_lower = query.to_lowercase();
        let query_terms: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<ScoredChunk> = index
            .chunks()
            .map(|chunk| {
                let chunk_lower = chunk.content.to_lowercase();
                let score = query_terms
                    .iter()
                    .filter(|term| chunk_lower.contains(*term))
                    .count() as f32
                    / query_terms.len().max(1) as f32;

                ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                }
            })
            .filter(|sc| sc.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(self.config.search_k);
        self.select(query, scored)
    }

    fn select(&self, query: &str, ranked: Vec<ScoredChunk>) -> RetrievedContext {
        let limit = self.config.token_limit;
        let mut chunks = Vec::new();
        let mut words = 0usize;

        for sc in ranked.into_iter().take(self.config.top_k) {
            let chunk_words = sc.chunk.word_count();
            if words + chunk_words > limit {
                tracing::debug!(
                    "Context budget of {} words reached after {} chunks",
                    limit,
                    chunks.len()
                );
                break;
            }
            words += chunk_words;
            chunks.push(sc);
        }

        RetrievedContext {
            query: query.to_string(),
            chunks,
        }
    }
}
