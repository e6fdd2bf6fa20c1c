//! Web-grounded question answering.
//!
//! A query is sent to a web search API, the result pages are scraped for
//! paragraph text, split into overlapping chunks, embedded and indexed. The
//! passages closest to the query are packed into a word budget and handed to
//! a chat model, which answers and cites the pages it used.

pub mod core;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod rag;
pub mod state;
pub mod tools;
pub mod vector_math;

pub use crate::core::errors::RagError;
pub use crate::llm::Answer;
pub use crate::pipeline::{AnswerStream, ProviderHealth, RagPipeline};
pub use crate::state::AppState;
