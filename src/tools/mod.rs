pub mod fetch;
pub mod search;

pub use fetch::{HttpPageFetcher, PageContent, PageFetcher};
pub use search::{ProviderSearcher, SearchResult, WebSearcher};
