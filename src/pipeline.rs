//! Query pipeline: search → scrape → chunk → embed → index → retrieve →
//! budget → prompt → answer with sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::config::Settings;
use crate::core::errors::RagError;
use crate::llm::prompt::{self, Answer};
use crate::llm::{ChatRequest, Embedder, LlmProvider};
use crate::rag::{ContextBuilder, RetrievedContext, TextSplitter, VectorIndex};
use crate::tools::fetch::PageFetcher;
use crate::tools::search::WebSearcher;

/// A streamed completion plus what is needed to finish it into an [`Answer`].
pub struct AnswerStream {
    tokens: mpsc::Receiver<Result<String, RagError>>,
    pub context: RetrievedContext,
    completion: String,
    shown: usize,
    ended: bool,
}

impl AnswerStream {
    fn new(tokens: mpsc::Receiver<Result<String, RagError>>, context: RetrievedContext) -> Self {
        Self {
            tokens,
            context,
            completion: String::new(),
            shown: 0,
            ended: false,
        }
    }

    /// Next piece of answer text ready for display. The trailing sources
    /// line is never yielded; it is parsed by [`AnswerStream::finish`].
    pub async fn next_text(&mut self) -> Option<Result<String, RagError>> {
        while !self.ended {
            let visible = match self.tokens.recv().await {
                Some(Ok(token)) => {
                    self.completion.push_str(&token);
                    prompt::visible_answer_len(&self.completion)
                }
                Some(Err(err)) => {
                    self.ended = true;
                    return Some(Err(err));
                }
                None => {
                    self.ended = true;
                    prompt::answer_end(&self.completion)
                }
            };
            if visible > self.shown {
                let text = self.completion[self.shown..visible].to_string();
                self.shown = visible;
                return Some(Ok(text));
            }
        }
        None
    }

    /// Parses everything received so far.
    pub fn finish(&self) -> Answer {
        prompt::parse_answer(&self.completion, &self.context.sources())
    }

    /// Drains the remaining tokens and parses the result.
    pub async fn collect(mut self) -> Result<Answer, RagError> {
        while let Some(text) = self.next_text().await {
            text?;
        }
        Ok(self.finish())
    }
}

/// Reachability of the configured model endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub chat: bool,
    pub embeddings: bool,
}

pub struct RagPipeline {
    searcher: Arc<dyn WebSearcher>,
    fetcher: Arc<dyn PageFetcher>,
    embedder: Embedder,
    chat: Arc<dyn LlmProvider>,
    settings: Settings,
    index_path: PathBuf,
}

impl RagPipeline {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        fetcher: Arc<dyn PageFetcher>,
        embedder: Embedder,
        chat: Arc<dyn LlmProvider>,
        settings: Settings,
        index_path: PathBuf,
    ) -> Self {
        Self {
            searcher,
            fetcher,
            embedder,
            chat,
            settings,
            index_path,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Searches the web for `query` and replaces the persisted index with
    /// the chunks of the pages found.
    pub async fn build_index(&self, query: &str) -> Result<VectorIndex, RagError> {
        let query = require_query(query)?;

        let results = self.searcher.search(query).await?;
        if results.is_empty() {
            return Err(RagError::NotFound(format!(
                "No search results for {:?}",
                query
            )));
        }
        let urls: Vec<String> = results.into_iter().map(|r| r.url).collect();

        let pages = self.fetcher.fetch_all(&urls).await;
        let splitter = TextSplitter::from_settings(&self.settings.chunking)?;
        let chunks = splitter.split_pages(&pages);
        if chunks.is_empty() {
            return Err(RagError::NotFound(format!(
                "None of the {} pages found for {:?} had extractable text",
                urls.len(),
                query
            )));
        }
        tracing::info!(
            "Split {} pages into {} chunks",
            pages.iter().filter(|p| !p.is_empty()).count(),
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        let index = VectorIndex::build(self.embedder.model(), chunks, embeddings)?;
        index.persist(&self.index_path)?;

        Ok(index)
    }

    pub fn load_index(&self) -> Result<VectorIndex, RagError> {
        VectorIndex::load(&self.index_path)
    }

    /// Ranks the index against `query` and keeps what fits the word budget.
    pub async fn retrieve(&self, query: &str, index: &VectorIndex) -> Result<RetrievedContext, RagError> {
        let query = require_query(query)?;
        let builder = ContextBuilder::new(self.settings.retrieval.clone());

        let hits = match self.embedder.embed_query(query).await {
            Ok(embedding) => index.search(&embedding, builder.search_k()),
            Err(err) => Err(err),
        };

        let context = match hits {
            Ok(hits) => builder.build_context(query, hits),
            Err(err) if self.settings.retrieval.keyword_fallback => {
                tracing::warn!("Query embedding failed, using keyword ranking: {}", err);
                builder.build_context_keyword(query, index)
            }
            Err(err) => return Err(err),
        };

        tracing::debug!(
            "Retrieved {} chunks ({} words) for {:?}",
            context.chunks.len(),
            context.word_count(),
            query
        );
        Ok(context)
    }

    /// Full pipeline: rebuilds the index from a fresh web search, then answers.
    pub async fn answer(&self, query: &str) -> Result<Answer, RagError> {
        let index = self.build_index(query).await?;
        self.answer_with_index(query, &index).await
    }

    /// Answers from the persisted index without searching again.
    pub async fn answer_from_index(&self, query: &str) -> Result<Answer, RagError> {
        require_query(query)?;
        let index = self.load_index()?;
        self.answer_with_index(query, &index).await
    }

    pub async fn stream_answer(&self, query: &str) -> Result<AnswerStream, RagError> {
        let index = self.build_index(query).await?;
        let context = self.retrieve(query, &index).await?;
        let request = self.chat_request(&context);
        let tokens = self
            .chat
            .stream_chat(request, &self.settings.llm.model)
            .await?;
        Ok(AnswerStream::new(tokens, context))
    }

    /// Asks the chat and embedding endpoints whether they are reachable.
    pub async fn check_providers(&self) -> ProviderHealth {
        let (chat, embeddings) = tokio::join!(
            reachable(self.chat.as_ref()),
            reachable(self.embedder.provider())
        );
        ProviderHealth { chat, embeddings }
    }

    async fn answer_with_index(&self, query: &str, index: &VectorIndex) -> Result<Answer, RagError> {
        let context = self.retrieve(query, index).await?;
        let request = self.chat_request(&context);
        let completion = self.chat.chat(request, &self.settings.llm.model).await?;
        Ok(prompt::parse_answer(&completion, &context.sources()))
    }

    fn chat_request(&self, context: &RetrievedContext) -> ChatRequest {
        if context.is_empty() {
            tracing::warn!("No passages fit the context budget for {:?}", context.query);
        }
        ChatRequest::new(prompt::build_messages(context)).with_settings(&self.settings.llm)
    }
}

async fn reachable(provider: &dyn LlmProvider) -> bool {
    match provider.health_check().await {
        Ok(healthy) => healthy,
        Err(err) => {
            tracing::warn!("Health check for {} failed: {}", provider.name(), err);
            false
        }
    }
}

fn require_query(query: &str) -> Result<&str, RagError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(RagError::BadRequest("Query is required".to_string()));
    }
    Ok(query)
}
