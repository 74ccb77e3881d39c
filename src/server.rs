use crate::controller::LoadBalancerController;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::Result;

pub struct HealthServer {
    listener: TcpListener,
    prometheus_handle: PrometheusHandle,
    controller: Arc<LoadBalancerController>,
    start_time: chrono::DateTime<chrono::Utc>,
    version: String,
}

impl HealthServer {
    pub async fn new(
        bind_addr: &str,
        prometheus_handle: PrometheusHandle,
        controller: Arc<LoadBalancerController>,
        version: String,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let bind_addr = listener.local_addr()?;

        info!("Health check server will bind to {}", bind_addr);

        Ok(Self {
            listener,
            prometheus_handle,
            controller,
            start_time: chrono::Utc::now(),
            version,
        })
    }

    pub async fn serve(self) -> Result<()> {
        info!(
            "Starting health check server on {}",
            self.listener.local_addr()?
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let prometheus_handle = self.prometheus_handle.clone();
                    let controller = Arc::clone(&self.controller);
                    let start_time = self.start_time;
                    let version = self.version.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(
                            stream,
                            prometheus_handle,
                            controller,
                            start_time,
                            version,
                        )
                        .await
                        {
                            error!("Error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    prometheus_handle: PrometheusHandle,
    controller: Arc<LoadBalancerController>,
    start_time: chrono::DateTime<chrono::Utc>,
    version: String,
) -> Result<()> {
    let mut buffer = [0; 1024];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    // Parse the HTTP request line
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        send_response(&mut stream, 400, "Bad Request", "text/plain", "Bad Request").await?;
        return Ok(());
    }

    let path = parts[1];

    match path {
        "/health" => {
            let healthy = controller.is_healthy();
            let response = json!({
                "status": if healthy { "healthy" } else { "unhealthy" },
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            let (code, text) = if healthy { (200, "OK") } else { (503, "Service Unavailable") };
            send_json_response(&mut stream, code, text, &response).await?;
        }
        "/ready" => {
            let response = json!({
                "status": "ready",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "uptime_seconds": (chrono::Utc::now() - start_time).num_seconds()
            });
            send_json_response(&mut stream, 200, "OK", &response).await?;
        }
        "/metrics" => {
            let metrics = prometheus_handle.render();
            send_response(&mut stream, 200, "OK", "text/plain", &metrics).await?;
        }
        "/version" => {
            let response = json!({
                "version": version,
                "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
                "git_commit": option_env!("GIT_COMMIT").unwrap_or("unknown")
            });
            send_json_response(&mut stream, 200, "OK", &response).await?;
        }
        "/status" => {
            let uptime = chrono::Utc::now() - start_time;
            let response = json!({
                "status": "running",
                "controller": controller.name(),
                "version": version,
                "uptime_seconds": uptime.num_seconds(),
                "start_time": start_time.to_rfc3339(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            send_json_response(&mut stream, 200, "OK", &response).await?;
        }
        _ => {
            send_response(&mut stream, 404, "Not Found", "text/plain", "Not Found").await?;
        }
    }

    Ok(())
}

async fn send_response(
    stream: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    content_type: &str,
    body: &str,
) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn send_json_response(
    stream: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    json_value: &serde_json::Value,
) -> Result<()> {
    let body = json_value.to_string();
    send_response(stream, status_code, status_text, "application/json", &body).await
}

pub fn setup_metrics() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder().map_err(|e| {
        crate::Error::config_at(format!("Failed to setup metrics: {}", e), "metrics")
    })?;

    metrics::describe_counter!(
        "lb_controller_applies_total",
        "Total number of configs applied to the provider"
    );
    metrics::describe_counter!(
        "lb_controller_sync_failures_total",
        "Total number of reconcile passes that failed and were requeued"
    );
    metrics::describe_gauge!(
        "lb_controller_backoff_seconds",
        "Current requeue backoff in seconds"
    );
    metrics::describe_histogram!(
        "lb_controller_apply_duration_seconds",
        "Time taken to apply a config on the provider"
    );

    Ok(handle)
}
