pub mod certs;
pub mod config;
pub mod controller;
pub mod error;
pub mod metadata;
pub mod provider;
pub mod server;
pub mod settings;

use controller::LoadBalancerController;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::signal;

pub use error::{Error, Result};
pub use settings::Settings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Self-service labels the controller consumes.
pub const CERT_DIR_LABEL: &str = "io.rancher.lb_service.cert_dir";
pub const DEFAULT_CERT_DIR_LABEL: &str = "io.rancher.lb_service.default_cert_dir";
pub const TARGET_LABEL: &str = "io.rancher.lb_service.target";

static CONTROLLERS: OnceLock<HashMap<String, Arc<LoadBalancerController>>> = OnceLock::new();

/// Populate the process-wide controller registry. Called once at startup;
/// afterwards the table is read-only.
pub fn register_controllers(controllers: Vec<Arc<LoadBalancerController>>) -> Result<()> {
    let mut table = HashMap::new();
    for controller in controllers {
        table.insert(controller.name().to_string(), controller);
    }
    CONTROLLERS
        .set(table)
        .map_err(|_| Error::config_at("Controller registry already initialized", "registry"))
}

pub fn get_controller(name: &str) -> Option<Arc<LoadBalancerController>> {
    CONTROLLERS.get().and_then(|table| table.get(name).cloned())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
