use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;

use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::llm::{Embedder, LlmProvider, OpenAiCompatProvider};
use crate::pipeline::RagPipeline;
use crate::tools::fetch::HttpPageFetcher;
use crate::tools::search::ProviderSearcher;

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Settings,
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    pub fn initialize() -> anyhow::Result<Arc<Self>> {
        Self::initialize_with(Arc::new(AppPaths::new()))
    }

    pub fn initialize_with(paths: Arc<AppPaths>) -> anyhow::Result<Arc<Self>> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .with_context(|| format!("Failed to load {}", config.config_path().display()))?;

        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        let searcher = Arc::new(ProviderSearcher::new(client.clone(), settings.search.clone()));
        let fetcher = Arc::new(
            HttpPageFetcher::new(settings.fetch.clone()).context("Failed to build page fetcher")?,
        );
        let embedding_provider: Arc<dyn LlmProvider> = Arc::new(
            OpenAiCompatProvider::for_embeddings(client.clone(), &settings.embedding),
        );
        let embedder = Embedder::from_settings(embedding_provider, &settings.embedding);
        let chat: Arc<dyn LlmProvider> =
            Arc::new(OpenAiCompatProvider::for_chat(client, &settings.llm));

        let pipeline = Arc::new(RagPipeline::new(
            searcher,
            fetcher,
            embedder,
            chat,
            settings.clone(),
            paths.index_path.clone(),
        ));

        Ok(Arc::new(AppState {
            paths,
            config,
            settings,
            pipeline,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_from_a_config_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("config.yml"),
            "retrieval:\n  top_k: 3\nfetch:\n  interval_ms: 0\n",
        )
        .expect("write config");
        let paths = Arc::new(AppPaths::with_data_dir(
            tmp.path().to_path_buf(),
            tmp.path().join("data"),
        ));

        let state = AppState::initialize_with(paths).expect("state");
        assert_eq!(state.settings.retrieval.top_k, 3);
        assert_eq!(state.pipeline.index_path(), state.paths.index_path.as_path());
    }
}
