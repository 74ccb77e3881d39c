use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider '{provider}' failed to apply config '{config_name}': {reason}")]
    ApplyFailed {
        provider: String,
        config_name: String,
        reason: String,
    },

    #[error("Provider '{provider}' rejected custom config: {reason}")]
    CustomConfigRejected { provider: String, reason: String },

    #[error("Provider '{provider}' failed to stop: {reason}")]
    StopFailed { provider: String, reason: String },

    #[error("Provider '{provider}' does not support endpoint draining")]
    DrainUnsupported { provider: String },

    #[error("Endpoint '{endpoint}' is not tracked for draining")]
    EndpointNotDraining { endpoint: String },
}

impl ProviderError {
    pub fn apply_failed(
        provider: impl Into<String>,
        config_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ApplyFailed {
            provider: provider.into(),
            config_name: config_name.into(),
            reason: reason.into(),
        }
    }

    pub fn custom_config_rejected(
        provider: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CustomConfigRejected {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn drain_unsupported(provider: impl Into<String>) -> Self {
        Self::DrainUnsupported {
            provider: provider.into(),
        }
    }
}
