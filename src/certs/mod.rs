pub mod error;

use crate::config::Certificate;
use async_trait::async_trait;
use bon::bon;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::CertsError;


/// Produces the certificate material a config build attaches. The
/// controller consumes an opaque list plus a default; where the PEM bytes
/// come from (mounted directories, a management API) is this trait's
/// business.
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    /// Look up a certificate by name. `None` when unknown.
    async fn fetch_certificate(&self, name: &str) -> Result<Option<Certificate>, CertsError>;

    /// Read every certificate under `dir`, one subdirectory per
    /// certificate.
    async fn read_all_certificates_from_dir(
        &self,
        dir: &Path,
    ) -> Result<Vec<Certificate>, CertsError>;

    /// Read the single certificate pair stored directly in `dir`.
    async fn read_default_certificate(
        &self,
        dir: &Path,
    ) -> Result<Option<Certificate>, CertsError>;

    /// Watch for certificate content changes, pushing `key` into `tx`
    /// whenever a reconcile should run. Returns on `stop_watcher` or when
    /// `tx` closes.
    async fn look_for_cert_updates(&self, key: String, tx: mpsc::Sender<String>);

    fn stop_watcher(&self);
}

/// Management-plane API access for certificates that are not mounted on
/// disk.
pub struct ManagementApi {
    http: reqwest::Client,
    url: String,
    access_key: String,
    secret_key: String,
}

#[bon]
impl ManagementApi {
    #[builder]
    pub fn new(
        url: String,
        access_key: String,
        secret_key: String,
        #[builder(default = Duration::from_secs(10))] timeout: Duration,
    ) -> Result<Self, CertsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CertsError::api_request(&url, e.to_string()))?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            access_key,
            secret_key,
        })
    }

    async fn fetch_certificate(&self, name: &str) -> Result<Option<Certificate>, CertsError> {
        #[derive(serde::Deserialize)]
        struct CertificateList {
            #[serde(default)]
            data: Vec<ApiCertificate>,
        }
        #[derive(serde::Deserialize)]
        struct ApiCertificate {
            #[serde(default)]
            name: String,
            #[serde(default)]
            cert: String,
            #[serde(default)]
            key: String,
        }

        let url = format!("{}/certificates?name={}", self.url, name);
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| CertsError::api_request(&url, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CertsError::api_request(
                &url,
                format!("status {}", status.as_u16()),
            ));
        }

        let list: CertificateList = resp
            .json()
            .await
            .map_err(|e| CertsError::api_request(&url, e.to_string()))?;

        Ok(list.data.into_iter().next().map(|c| Certificate {
            name: c.name,
            cert: c.cert,
            key: c.key,
            fetched: true,
        }))
    }
}

/// Certificate fetcher backed by bulk-mounted directories, with an
/// optional management-API fallback for certificates referenced by name
/// only.
///
/// Layout: `cert_dir/<name>/<cert_file_name>` plus
/// `cert_dir/<name>/<key_file_name>`; the default certificate pair sits
/// directly inside `default_cert_dir`. A poll loop re-reads the
/// directories and triggers a reconcile when the material changed, with a
/// periodic forced trigger as a safety net.
pub struct CattleCertificateFetcher {
    cert_dir: Option<PathBuf>,
    default_cert_dir: Option<PathBuf>,
    cert_file_name: String,
    key_file_name: String,
    poll_interval: Duration,
    force_update_interval: Duration,
    api: Option<ManagementApi>,
    cache: RwLock<HashMap<String, Certificate>>,
    cancel: CancellationToken,
}

#[bon]
impl CattleCertificateFetcher {
    #[builder]
    pub fn new(
        cert_dir: Option<PathBuf>,
        default_cert_dir: Option<PathBuf>,
        #[builder(default = String::from("fullchain.pem"))] cert_file_name: String,
        #[builder(default = String::from("privkey.pem"))] key_file_name: String,
        #[builder(default = Duration::from_secs(30))] poll_interval: Duration,
        #[builder(default = Duration::from_secs(300))] force_update_interval: Duration,
        api: Option<ManagementApi>,
    ) -> Self {
        Self {
            cert_dir,
            default_cert_dir,
            cert_file_name,
            key_file_name,
            poll_interval,
            force_update_interval,
            api,
            cache: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Read one `<cert, key>` pair out of `dir`, named after the
    /// directory. `None` when neither file exists.
    async fn read_pair(&self, dir: &Path) -> Result<Option<Certificate>, CertsError> {
        let cert_path = dir.join(&self.cert_file_name);
        let key_path = dir.join(&self.key_file_name);

        match (cert_path.exists(), key_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) | (false, true) => {
                let missing = if key_path.exists() {
                    &self.cert_file_name
                } else {
                    &self.key_file_name
                };
                return Err(CertsError::IncompletePair {
                    name: dir
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    missing: missing.clone(),
                    dir: dir.to_path_buf(),
                });
            }
            (true, true) => {}
        }

        let cert = tokio::fs::read_to_string(&cert_path)
            .await
            .map_err(|e| CertsError::read_failed(&cert_path, e))?;
        let key = tokio::fs::read_to_string(&key_path)
            .await
            .map_err(|e| CertsError::read_failed(&key_path, e))?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Some(Certificate {
            name,
            cert,
            key,
            fetched: true,
        }))
    }

    /// Current view of every configured directory, in stable name order.
    async fn scan(&self) -> Result<Vec<Certificate>, CertsError> {
        let mut certs = Vec::new();
        if let Some(default_dir) = &self.default_cert_dir {
            if let Some(cert) = self.read_default_certificate(default_dir).await? {
                certs.push(cert);
            }
        }
        if let Some(dir) = &self.cert_dir {
            certs.extend(self.read_all_certificates_from_dir(dir).await?);
        }
        Ok(certs)
    }
}

#[async_trait]
impl CertificateFetcher for CattleCertificateFetcher {
    async fn fetch_certificate(&self, name: &str) -> Result<Option<Certificate>, CertsError> {
        if name.is_empty() {
            return Ok(None);
        }
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| CertsError::cache_poisoned())?;
            if let Some(cert) = cache.get(name) {
                return Ok(Some(cert.clone()));
            }
        }
        match &self.api {
            Some(api) => api.fetch_certificate(name).await,
            None => Ok(None),
        }
    }

    async fn read_all_certificates_from_dir(
        &self,
        dir: &Path,
    ) -> Result<Vec<Certificate>, CertsError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| CertsError::read_failed(dir, e))?;

        let mut cert_dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CertsError::read_failed(dir, e))?
        {
            let path = entry.path();
            if path.is_dir() {
                cert_dirs.push(path);
            }
        }
        // Directory listing order is filesystem-dependent.
        cert_dirs.sort();

        let mut certs = Vec::new();
        for cert_dir in cert_dirs {
            match self.read_pair(&cert_dir).await {
                Ok(Some(cert)) => certs.push(cert),
                Ok(None) => {
                    debug!(dir = %cert_dir.display(), "No certificate pair in directory")
                }
                Err(e) => {
                    warn!(dir = %cert_dir.display(), "Skipping unreadable certificate: {}", e)
                }
            }
        }

        Ok(certs)
    }

    async fn read_default_certificate(
        &self,
        dir: &Path,
    ) -> Result<Option<Certificate>, CertsError> {
        self.read_pair(dir).await
    }

    async fn look_for_cert_updates(&self, key: String, tx: mpsc::Sender<String>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_forced = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Certificate watcher stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let certs = match self.scan().await {
                Ok(certs) => certs,
                Err(e) => {
                    warn!("Certificate scan failed: {}", e);
                    continue;
                }
            };

            let changed = {
                let cache = match self.cache.read() {
                    Ok(cache) => cache,
                    Err(_) => continue,
                };
                certs.len() != cache.len()
                    || certs
                        .iter()
                        .any(|c| cache.get(&c.name).map(|old| old != c).unwrap_or(true))
            };

            let forced = last_forced.elapsed() >= self.force_update_interval;
            if !changed && !forced {
                continue;
            }

            if let Ok(mut cache) = self.cache.write() {
                cache.clear();
                for cert in certs {
                    cache.insert(cert.name.clone(), cert);
                }
            }

            if forced {
                last_forced = tokio::time::Instant::now();
            }
            debug!(changed, forced, "Scheduling reconcile for certificates");
            if tx.send(key.clone()).await.is_err() {
                return;
            }
        }
    }

    fn stop_watcher(&self) {
        self.cancel.cancel();
    }
}
