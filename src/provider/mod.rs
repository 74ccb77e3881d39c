pub mod error;
pub mod file;

use crate::config::LoadBalancerConfig;
use crate::controller::queue::TaskQueue;
use async_trait::async_trait;
use std::sync::Arc;

pub use error::ProviderError;
pub use file::JsonFileProvider;

/// A data-plane backend the controller applies canonical configs to.
///
/// The controller calls this opaquely: it never inspects what the provider
/// does with a config beyond success or failure. Endpoint-drain verbs are
/// optional; providers without drain support keep the default
/// `Unsupported` behavior and an attached event subscriber simply gets an
/// error back.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Push a canonical config to the data plane.
    async fn apply(&self, config: &LoadBalancerConfig) -> Result<(), ProviderError>;

    /// Give the provider a chance to merge the user-supplied raw config
    /// blob into the canonical config before apply.
    async fn process_custom_config(
        &self,
        config: &mut LoadBalancerConfig,
        custom_config: &str,
    ) -> Result<(), ProviderError>;

    /// Long-running provider work (config reload watching, endpoint
    /// publishing). `queue` lets the provider request reconciles.
    async fn run(&self, queue: Option<Arc<TaskQueue>>);

    async fn stop(&self) -> Result<(), ProviderError>;

    fn is_healthy(&self) -> bool;

    async fn is_endpoint_up_for_drain(&self, endpoint_name: &str) -> Result<bool, ProviderError> {
        let _ = endpoint_name;
        Err(ProviderError::drain_unsupported(self.name()))
    }

    async fn drain_endpoint(&self, endpoint_name: &str) -> Result<(), ProviderError> {
        let _ = endpoint_name;
        Err(ProviderError::drain_unsupported(self.name()))
    }

    async fn is_endpoint_drained(&self, endpoint_name: &str) -> Result<bool, ProviderError> {
        let _ = endpoint_name;
        Err(ProviderError::drain_unsupported(self.name()))
    }

    async fn remove_endpoint_from_drain(&self, endpoint_name: &str) -> Result<(), ProviderError> {
        let _ = endpoint_name;
        Err(ProviderError::drain_unsupported(self.name()))
    }
}
