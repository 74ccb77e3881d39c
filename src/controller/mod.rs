mod builder;
mod endpoints;
pub mod error;
pub mod queue;
mod selector;

use crate::certs::CertificateFetcher;
use crate::config::LoadBalancerConfig;
use crate::metadata::{LBMetadata, MetadataFetcher, Service};
use crate::provider::Provider;
use crate::{Error, Result, TARGET_LABEL};
use bon::bon;
use queue::TaskQueue;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use endpoints::hash_ip;
pub use error::ControllerError;


/// Policy for placing traffic on containers that share a host with the
/// balancer, taken from the self-service target label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalityPref {
    #[default]
    Any,
    OnlyLocal,
    PreferLocal,
}

impl FromStr for LocalityPref {
    type Err = ControllerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "any" => Ok(LocalityPref::Any),
            "only-local" => Ok(LocalityPref::OnlyLocal),
            "prefer-local" => Ok(LocalityPref::PreferLocal),
            other => Err(ControllerError::invalid_target_label(TARGET_LABEL, other)),
        }
    }
}

/// An optional external event consumer. When attached it receives the
/// provider handle so it can drive the endpoint-drain verbs; the drain
/// policy (timeouts, polling) lives entirely on its side.
#[async_trait::async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn run(&self, provider: Arc<dyn Provider>);
}

/// The reconciliation engine: one coalescing queue, one sync worker, and
/// watcher tasks that feed it. Every sync derives a fresh canonical config
/// from metadata and hands it to the provider; nothing is persisted
/// between passes except the backoff counter.
pub struct LoadBalancerController {
    name: String,
    meta_fetcher: Arc<dyn MetadataFetcher>,
    cert_fetcher: Arc<dyn CertificateFetcher>,
    provider: Arc<dyn Provider>,
    event_subscriber: Option<Arc<dyn EventSubscriber>>,
    queue: Arc<TaskQueue>,
    backoff_secs: AtomicU64,
    backoff_step_secs: u64,
    metadata_poll_secs: u64,
    shutdown: AtomicBool,
    task_handles: StdMutex<Vec<JoinHandle<()>>>,
    sync_worker: StdMutex<Option<JoinHandle<()>>>,
}

#[bon]
impl LoadBalancerController {
    #[builder]
    pub fn new(
        #[builder(default = String::from("rancher"))] name: String,
        meta_fetcher: Arc<dyn MetadataFetcher>,
        cert_fetcher: Arc<dyn CertificateFetcher>,
        provider: Arc<dyn Provider>,
        event_subscriber: Option<Arc<dyn EventSubscriber>>,
        #[builder(default = 5)] backoff_step_secs: u64,
        #[builder(default = 5)] metadata_poll_secs: u64,
    ) -> Self {
        Self {
            name,
            meta_fetcher,
            cert_fetcher,
            provider,
            event_subscriber,
            queue: Arc::new(TaskQueue::new()),
            backoff_secs: AtomicU64::new(0),
            backoff_step_secs,
            metadata_poll_secs,
            shutdown: AtomicBool::new(false),
            task_handles: StdMutex::new(Vec::new()),
            sync_worker: StdMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.queue)
    }

    pub fn is_healthy(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst) && self.provider.is_healthy()
    }

    /// Schedule a reconcile. Safe to call from any task; triggers landing
    /// while a sync is pending coalesce.
    pub fn schedule_apply_config(&self) {
        debug!("Scheduling apply config");
        self.queue.enqueue(self.name.clone());
    }

    /// Start the watcher tasks and the sync worker. Returns once
    /// everything is spawned; the controller then runs until `stop`.
    pub async fn run(self: Arc<Self>) {
        info!("Starting {} controller", self.name);

        let (trigger_tx, mut trigger_rx) = mpsc::channel::<String>(16);

        let cert_watcher = {
            let controller = Arc::clone(&self);
            let tx = trigger_tx.clone();
            tokio::spawn(async move {
                controller
                    .cert_fetcher
                    .look_for_cert_updates(controller.name.clone(), tx)
                    .await;
            })
        };

        let metadata_watcher = {
            let controller = Arc::clone(&self);
            let tx = trigger_tx;
            tokio::spawn(async move {
                controller
                    .meta_fetcher
                    .on_change(controller.metadata_poll_secs, controller.name.clone(), tx)
                    .await;
            })
        };

        let trigger_pump = {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(key) = trigger_rx.recv().await {
                    controller.queue.enqueue(key);
                }
            })
        };

        let provider_task = {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                let queue = controller.queue();
                controller.provider.run(Some(queue)).await;
            })
        };

        let subscriber_task = self.event_subscriber.as_ref().map(|subscriber| {
            let subscriber = Arc::clone(subscriber);
            let provider = Arc::clone(&self.provider);
            tokio::spawn(async move {
                subscriber.run(provider).await;
            })
        });

        let sync_worker = {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(key) = controller.queue.next().await {
                    controller.sync(&key).await;
                }
                debug!("Sync worker exited");
            })
        };

        let mut handles = self.task_handles.lock().unwrap();
        handles.push(cert_watcher);
        handles.push(metadata_watcher);
        handles.push(trigger_pump);
        handles.push(provider_task);
        if let Some(task) = subscriber_task {
            handles.push(task);
        }
        drop(handles);
        *self.sync_worker.lock().unwrap() = Some(sync_worker);
    }

    /// One reconcile pass: read metadata, build, apply. Failures are
    /// logged and requeued with linearly growing backoff; the first
    /// success resets it.
    pub async fn sync(&self, key: &str) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        debug!("Syncing up LB");

        let mut requeue = false;
        match self.get_lb_configs().await {
            Ok(configs) => {
                for config in &configs {
                    let started = std::time::Instant::now();
                    if let Err(e) = self.provider.apply(config).await {
                        error!("Failed to apply lb config on provider: {}", e);
                        requeue = true;
                    } else {
                        metrics::histogram!("lb_controller_apply_duration_seconds")
                            .record(started.elapsed().as_secs_f64());
                        metrics::counter!("lb_controller_applies_total").increment(1);
                    }
                }
            }
            Err(e) => {
                error!("Failed to get lb config: {}", e);
                requeue = true;
            }
        }

        if requeue {
            metrics::counter!("lb_controller_sync_failures_total").increment(1);
            self.requeue(key.to_string());
        } else {
            self.backoff_secs.store(0, Ordering::SeqCst);
            metrics::gauge!("lb_controller_backoff_seconds").set(0.0);
        }
    }

    /// Grow the backoff by one step and re-enqueue the key after sleeping
    /// it off on a detached task, so the worker stays free.
    fn requeue(&self, key: String) {
        let backoff = self
            .backoff_secs
            .fetch_add(self.backoff_step_secs, Ordering::SeqCst)
            + self.backoff_step_secs;
        metrics::gauge!("lb_controller_backoff_seconds").set(backoff as f64);

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            debug!(backoff_secs = backoff, "Retrying sync after backoff");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            queue.enqueue(key);
        });
    }

    /// Derive the canonical configs for the current metadata snapshot.
    pub async fn get_lb_configs(&self) -> Result<Vec<LoadBalancerConfig>> {
        let lb_svc = self.meta_fetcher.get_self_service().await?;
        let lb_meta = self.collect_lb_metadata(&lb_svc).await?;

        let mut self_host_uuid = String::new();
        let mut local_pref = LocalityPref::Any;
        if let Some(val) = lb_svc.labels.get(TARGET_LABEL) {
            local_pref = val.parse()?;
            self_host_uuid = self.meta_fetcher.get_self_host_uuid().await?;
        }

        debug!(labels = ?lb_svc.labels, "Self-service labels");
        self.build_config_from_metadata(
            &lb_svc.name,
            &lb_svc.environment_uuid,
            &self_host_uuid,
            local_pref,
            &lb_meta,
            &lb_svc.labels,
        )
        .await
    }

    /// The self-service port rules with every selector rule expanded into
    /// concrete service rules.
    pub async fn collect_lb_metadata(&self, lb_svc: &Service) -> Result<LBMetadata> {
        let mut lb_meta = lb_svc.lb_config.clone();
        self.process_selector(&mut lb_meta).await?;
        Ok(lb_meta)
    }

    /// Stop the controller: the provider first, then the watchers and the
    /// queue. In-flight applies complete; a second call is an error.
    pub async fn stop(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Err(Error::from(ControllerError::ShutdownInProgress));
        }

        info!("Shutting down {} controller", self.name);
        if let Err(e) = self.provider.stop().await {
            error!("Error stopping provider: {}", e);
        }
        self.cert_fetcher.stop_watcher();
        self.queue.shutdown();

        let handles = {
            let mut handles = self.task_handles.lock().unwrap();
            std::mem::take(&mut *handles)
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }

        // The sync worker is never aborted: an in-flight apply completes,
        // then the drained queue ends the task.
        let worker = self.sync_worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        Ok(())
    }
}
