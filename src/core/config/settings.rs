//! Typed view over the merged YAML config.
//!
//! Every field has a default, so an empty config file yields a working
//! setup as long as the provider keys are supplied through secrets or the
//! environment.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::RagError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search: SearchSettings,
    pub fetch: FetchSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub llm: LlmSettings,
}

impl Settings {
    pub fn from_value(value: &Value) -> Result<Self, RagError> {
        serde_json::from_value(value.clone())
            .map_err(|err| RagError::BadRequest(format!("Invalid config: {}", err)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// "serpapi", "google", "brave", "bing" or "duckduckgo"
    pub provider: String,
    pub max_results: usize,
    pub location: String,
    pub hl: String,
    pub gl: String,
    pub google_domain: String,
    pub serpapi_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub google_engine_id: Option<String>,
    pub brave_api_key: Option<String>,
    pub bing_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider: "serpapi".to_string(),
            max_results: 6,
            location: "Austin, Texas, United States".to_string(),
            hl: "en".to_string(),
            gl: "us".to_string(),
            google_domain: "google.com".to_string(),
            serpapi_api_key: None,
            google_api_key: None,
            google_engine_id: None,
            brave_api_key: None,
            bing_api_key: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: String,
    /// Minimum spacing between two page requests.
    pub interval_ms: u64,
    pub timeout_secs: u64,
    pub max_bytes: usize,
    pub block_private_hosts: bool,
    pub url_denylist: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            interval_ms: 1000,
            timeout_secs: 15,
            max_bytes: 2_000_000,
            block_private_hosts: true,
            url_denylist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: "sentence-transformers/all-mpnet-base-v2".to_string(),
            api_key: None,
            batch_size: 32,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Candidates pulled from the index per query.
    pub search_k: usize,
    /// Ranked chunks considered for the prompt.
    pub top_k: usize,
    /// Word budget for the assembled context.
    pub token_limit: usize,
    pub keyword_fallback: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            search_k: 4,
            top_k: 5,
            token_limit: 1024,
            keyword_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 120,
        }
    }
}
