use super::{Container, MetadataError, MetadataFetcher, Service};
use async_trait::async_trait;
use bon::bon;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// HTTP client for the metadata store.
///
/// Answers are plain JSON under a versioned base path; change detection
/// works by polling the `version` answer, which the store bumps on every
/// metadata mutation.
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

#[bon]
impl MetadataClient {
    #[builder]
    pub fn new(
        base_url: String,
        #[builder(default = Duration::from_secs(10))] timeout: Duration,
    ) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::request_failed(&base_url, e))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Block until the metadata store answers, retrying once a second.
    pub async fn wait_ready(&self, max_attempts: u32) -> Result<(), MetadataError> {
        for attempt in 1..=max_attempts {
            match self.get_text("version").await {
                Ok(_) => {
                    info!(url = %self.base_url, "Metadata store is reachable");
                    return Ok(());
                }
                Err(e) => {
                    debug!(attempt, "Metadata store not ready yet: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Err(MetadataError::NotReady {
            url: self.base_url.clone(),
            attempts: max_attempts,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MetadataError> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MetadataError::request_failed(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MetadataError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| MetadataError::decode(&url, e.to_string()))
    }

    async fn get_text(&self, path: &str) -> Result<String, MetadataError> {
        let url = self.url(path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MetadataError::request_failed(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MetadataError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }

        resp.text()
            .await
            .map_err(|e| MetadataError::decode(&url, e.to_string()))
    }

    fn find_service(
        &self,
        services: Vec<Service>,
        env_uuid: Option<&str>,
        stack: &str,
        name: &str,
    ) -> Option<Service> {
        services.into_iter().find(|svc| {
            if let Some(env_uuid) = env_uuid {
                if !svc.environment_uuid.eq_ignore_ascii_case(env_uuid) {
                    return false;
                }
            }
            svc.name.eq_ignore_ascii_case(name) && svc.stack_name.eq_ignore_ascii_case(stack)
        })
    }
}

#[async_trait]
impl MetadataFetcher for MetadataClient {
    async fn get_self_service(&self) -> Result<Service, MetadataError> {
        self.get_json("self/service").await
    }

    async fn get_self_host_uuid(&self) -> Result<String, MetadataError> {
        #[derive(serde::Deserialize)]
        struct Host {
            #[serde(default)]
            uuid: String,
        }
        let host: Host = self.get_json("self/host").await?;
        Ok(host.uuid)
    }

    async fn get_region_name(&self) -> Result<String, MetadataError> {
        // Served as a raw JSON string, so the answer arrives quote-wrapped.
        self.get_text("self/region").await
    }

    async fn get_services(&self) -> Result<Vec<Service>, MetadataError> {
        self.get_json("services").await
    }

    async fn get_services_by_environment(&self, env: &str) -> Result<Vec<Service>, MetadataError> {
        self.get_json(&format!("environments/{env}/services")).await
    }

    async fn get_services_by_region_environment(
        &self,
        region: &str,
        env: &str,
    ) -> Result<Vec<Service>, MetadataError> {
        self.get_json(&format!("regions/{region}/environments/{env}/services"))
            .await
    }

    async fn get_service_by_name(
        &self,
        env_uuid: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError> {
        let services = self.get_services().await?;
        Ok(self.find_service(services, Some(env_uuid), stack, name))
    }

    async fn get_service_by_environment(
        &self,
        env: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError> {
        let services = self.get_services_by_environment(env).await?;
        Ok(self.find_service(services, None, stack, name))
    }

    async fn get_service_by_region_environment(
        &self,
        region: &str,
        env: &str,
        stack: &str,
        name: &str,
    ) -> Result<Option<Service>, MetadataError> {
        let services = self.get_services_by_region_environment(region, env).await?;
        Ok(self.find_service(services, None, stack, name))
    }

    async fn get_container(
        &self,
        env_uuid: &str,
        name: &str,
    ) -> Result<Option<Container>, MetadataError> {
        let containers: Vec<Container> = self.get_json("containers").await?;
        Ok(containers.into_iter().find(|c| {
            c.environment_uuid.eq_ignore_ascii_case(env_uuid)
                && c.name.eq_ignore_ascii_case(name)
        }))
    }

    async fn on_change(&self, interval_secs: u64, key: String, tx: mpsc::Sender<String>) {
        let mut last_version: Option<String> = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let version = match self.get_text("version").await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Failed to poll metadata version: {}", e);
                    continue;
                }
            };

            if last_version.as_deref() != Some(version.as_str()) {
                debug!(version = %version, "Metadata version changed");
                last_version = Some(version);
                if tx.send(key.clone()).await.is_err() {
                    return;
                }
            }
        }
    }
}
