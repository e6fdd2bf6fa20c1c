pub mod embedder;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod types;

pub use embedder::Embedder;
pub use openai::OpenAiCompatProvider;
pub use prompt::{parse_answer, Answer};
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest};
