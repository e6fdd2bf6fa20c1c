use std::sync::Arc;

use super::provider::LlmProvider;
use crate::core::config::settings::EmbeddingSettings;
use crate::core::errors::RagError;

/// Embeds text through an [`LlmProvider`] in fixed-size batches.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_settings(provider: Arc<dyn LlmProvider>, settings: &EmbeddingSettings) -> Self {
        Self::new(provider, settings.model.clone(), settings.batch_size)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.provider.embed(batch, &self.model).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Upstream(format!(
                    "Embedding provider '{}' returned {} vectors for {} inputs",
                    self.provider.name(),
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }
        tracing::debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(embeddings)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed_documents(&[query.to_string()]).await?;
        vectors
            .pop()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RagError::Upstream("Empty query embedding".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::llm::types::ChatRequest;

    struct CountingProvider {
        batches: Mutex<Vec<usize>>,
        drop_one: bool,
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn health_check(&self) -> Result<bool, RagError> {
            Ok(true)
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, RagError> {
            Err(RagError::Internal("unused".to_string()))
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
            Err(RagError::Internal("unused".to_string()))
        }

        async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, RagError> {
            self.batches.lock().expect("lock").push(inputs.len());
            let take = if self.drop_one { inputs.len() - 1 } else { inputs.len() };
            Ok(inputs.iter().take(take).map(|s| vec![s.len() as f32, 1.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn embeds_in_batches_preserving_order() {
        let provider = Arc::new(CountingProvider {
            batches: Mutex::new(Vec::new()),
            drop_one: false,
        });
        let embedder = Embedder::new(provider.clone(), "m", 2);

        let vectors = embedder.embed_documents(&texts(5)).await.expect("embed");
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[4][0], 5.0);
        assert_eq!(*provider.batches.lock().expect("lock"), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn count_mismatch_is_upstream_error() {
        let provider = Arc::new(CountingProvider {
            batches: Mutex::new(Vec::new()),
            drop_one: true,
        });
        let embedder = Embedder::new(provider, "m", 32);

        let err = embedder.embed_documents(&texts(3)).await.expect_err("mismatch");
        assert!(matches!(err, RagError::Upstream(_)));
    }

    #[tokio::test]
    async fn no_texts_makes_no_requests() {
        let provider = Arc::new(CountingProvider {
            batches: Mutex::new(Vec::new()),
            drop_one: false,
        });
        let embedder = Embedder::new(provider.clone(), "m", 32);

        assert!(embedder.embed_documents(&[]).await.expect("embed").is_empty());
        assert!(provider.batches.lock().expect("lock").is_empty());
    }
}
