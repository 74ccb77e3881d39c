use super::{Provider, ProviderError};
use crate::config::LoadBalancerConfig;
use crate::controller::queue::TaskQueue;
use async_trait::async_trait;
use bon::bon;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Provider that renders the canonical config as JSON on disk, for
/// data planes that watch a file, and for driving the controller without
/// one attached.
pub struct JsonFileProvider {
    path: PathBuf,
    applied_once: AtomicBool,
}

#[bon]
impl JsonFileProvider {
    #[builder]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            applied_once: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Provider for JsonFileProvider {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn apply(&self, config: &LoadBalancerConfig) -> Result<(), ProviderError> {
        let rendered = serde_json::to_vec_pretty(config).map_err(|e| {
            ProviderError::apply_failed(self.name(), &config.name, e.to_string())
        })?;

        // Write-then-rename so a watching data plane never reads a torn
        // file.
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &rendered).await.map_err(|e| {
            ProviderError::apply_failed(self.name(), &config.name, e.to_string())
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            ProviderError::apply_failed(self.name(), &config.name, e.to_string())
        })?;

        self.applied_once.store(true, Ordering::SeqCst);
        info!(path = %self.path.display(), config = %config.name, "Wrote lb config");
        Ok(())
    }

    async fn process_custom_config(
        &self,
        _config: &mut LoadBalancerConfig,
        custom_config: &str,
    ) -> Result<(), ProviderError> {
        // The raw blob is data-plane specific; this provider has nothing
        // to merge it into.
        if !custom_config.is_empty() {
            debug!("Ignoring custom config blob of {} bytes", custom_config.len());
        }
        Ok(())
    }

    async fn run(&self, _queue: Option<Arc<TaskQueue>>) {}

    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.applied_once.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontendService;

    #[tokio::test]
    async fn test_apply_writes_config_atomically() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("lb-config.json");
        let provider = JsonFileProvider::builder().path(path.clone()).build();

        assert!(!provider.is_healthy());

        let config = LoadBalancerConfig {
            name: "lb".to_string(),
            frontend_services: vec![FrontendService {
                name: "80".to_string(),
                port: 80,
                ..Default::default()
            }],
            ..Default::default()
        };
        provider.apply(&config).await.unwrap();

        assert!(provider.is_healthy());
        let written: LoadBalancerConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, config);
        assert!(!path.with_extension("tmp").exists());
    }
}
