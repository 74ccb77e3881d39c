use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata request to {url} failed: {reason}")]
    RequestFailed {
        url: String,
        reason: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Metadata request to {url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Failed to decode metadata answer from {url}: {reason}")]
    Decode {
        url: String,
        reason: String,
    },

    #[error("Metadata store at {url} not reachable after {attempts} attempts")]
    NotReady { url: String, attempts: u32 },

    #[error("Failed to decode lb_config blob: {0}")]
    LbConfigDecode(#[from] serde_json::Error),
}

impl MetadataError {
    pub fn request_failed(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestFailed {
            url: url.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
