//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `TextSplitter`: Cuts scraped pages into overlapping chunks
//! - `VectorIndex`: Flat cosine index persisted as one JSON file
//! - `ContextBuilder`: Selects the budgeted passages for a query

pub mod context_builder;
pub mod splitter;
pub mod store;

pub use context_builder::{ContextBuilder, RetrievedContext, ScoredChunk};
pub use splitter::{TextChunk, TextSplitter};
pub use store::{ChunkSearchResult, StoredChunk, VectorIndex};
