use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertsError {
    #[error("Failed to read certificate material at {}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate '{name}' is missing its {missing} file under {}", dir.display())]
    IncompletePair {
        name: String,
        missing: String,
        dir: PathBuf,
    },

    #[error("Certificate API request to {url} failed: {reason}")]
    ApiRequest { url: String, reason: String },

    #[error("Certificate cache lock poisoned")]
    CachePoisoned,
}

impl CertsError {
    pub fn read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn api_request(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApiRequest {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn cache_poisoned() -> Self {
        Self::CachePoisoned
    }
}
