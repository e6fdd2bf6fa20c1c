use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        RagError::Internal(err.to_string())
    }

    pub fn upstream<E: std::fmt::Display>(err: E) -> Self {
        RagError::Upstream(err.to_string())
    }

    /// True when the request itself was at fault rather than a dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RagError::BadRequest(_) | RagError::Forbidden(_) | RagError::NotFound(_)
        )
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Internal(format!("json: {}", err))
    }
}
