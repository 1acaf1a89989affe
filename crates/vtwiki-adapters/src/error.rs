use thiserror::Error;
use vtwiki_storage::FetchError;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Deleted wiki page, unknown channel handle, missing embedded data.
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transport(FetchError),
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Token fetch failure or rejected credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Well-formed response carrying an upstream error code.
    #[error("{platform} rejected the request ({code}): {message}")]
    Rejected {
        platform: &'static str,
        code: i64,
        message: String,
    },
}

impl AdapterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        AdapterError::Malformed(what.into())
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { url } => AdapterError::NotFound(url),
            FetchError::Decode { url, source } => {
                AdapterError::Malformed(format!("{url}: {source}"))
            }
            other => AdapterError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_upstream_resources_map_to_not_found() {
        let err = AdapterError::from(FetchError::NotFound {
            url: "https://example.test/x".into(),
        });
        assert!(err.is_not_found());

        let err = AdapterError::from(FetchError::HttpStatus {
            status: 503,
            url: "https://example.test/x".into(),
        });
        assert!(matches!(err, AdapterError::Transport(_)));
    }
}
