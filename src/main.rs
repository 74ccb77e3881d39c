use clap::Parser;
use lb_controller::certs::{CattleCertificateFetcher, ManagementApi};
use lb_controller::controller::LoadBalancerController;
use lb_controller::metadata::{MetadataClient, MetadataFetcher};
use lb_controller::provider::JsonFileProvider;
use lb_controller::{
    register_controllers, server, shutdown_signal, Settings, CERT_DIR_LABEL,
    DEFAULT_CERT_DIR_LABEL, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconcile declarative routing intent into load-balancer configuration", long_about = None)]
struct Args {
    /// Base URL of the metadata store API
    #[arg(long, default_value = "http://rancher-metadata/2015-12-19")]
    metadata_url: String,

    /// Path the json-file provider renders the active config to
    #[arg(long, default_value = "lb-config.json")]
    config_out: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to log to (use "stdout" or "stderr" for console output)
    #[arg(short = 'l', long, default_value = "stdout")]
    log_path: String,

    /// Enable health check server on specified address (e.g., "127.0.0.1:8080")
    #[arg(long)]
    health_server: Option<String>,

    /// Print version information and exit
    #[arg(long = "version-info")]
    version_info: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Error loading .env file: {}", e);
        }
    }

    let args = Args::parse();

    if args.version_info {
        println!("lb-controller {}", VERSION);
        return;
    }

    // Initialize logging
    let env_filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if args.log_path == "stdout" || args.log_path == "stderr" {
        let subscriber = subscriber.with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    } else {
        let file_appender = tracing_appender::rolling::never("", &args.log_path);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        let subscriber = subscriber.with(fmt::layer().with_writer(non_blocking));
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to read configuration from environment: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting lb-controller v{}", VERSION);
    if settings.environment_admin_keys.is_some() || settings.agent_keys.is_some() {
        info!("Event subscriber credentials present; drain verbs are available to an attached subscriber");
    }

    let meta_client = match MetadataClient::builder()
        .base_url(args.metadata_url.clone())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize metadata client: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = meta_client.wait_ready(30).await {
        error!("Metadata store did not come up: {}", e);
        std::process::exit(1);
    }

    // The self-service labels decide where certificates come from.
    let self_service = match meta_client.get_self_service().await {
        Ok(svc) => svc,
        Err(e) => {
            error!("Failed to read self service: {}", e);
            std::process::exit(1);
        }
    };

    let api = match ManagementApi::builder()
        .url(settings.cattle_url.clone())
        .access_key(settings.cattle_access_key.clone())
        .secret_key(settings.cattle_secret_key.clone())
        .build()
    {
        Ok(api) => api,
        Err(e) => {
            error!("Failed to initialize management API client: {}", e);
            std::process::exit(1);
        }
    };

    let cert_fetcher = Arc::new(
        CattleCertificateFetcher::builder()
            .cert_file_name(settings.cert_file_name.clone())
            .key_file_name(settings.key_file_name.clone())
            .poll_interval(settings.certs_poll_interval)
            .force_update_interval(settings.certs_force_update_interval)
            .api(api)
            .maybe_cert_dir(self_service.labels.get(CERT_DIR_LABEL).map(PathBuf::from))
            .maybe_default_cert_dir(
                self_service
                    .labels
                    .get(DEFAULT_CERT_DIR_LABEL)
                    .map(PathBuf::from),
            )
            .build(),
    );

    let provider = Arc::new(JsonFileProvider::builder().path(args.config_out).build());

    let controller = Arc::new(
        LoadBalancerController::builder()
            .meta_fetcher(Arc::new(meta_client))
            .cert_fetcher(cert_fetcher)
            .provider(provider)
            .build(),
    );

    if let Err(e) = register_controllers(vec![Arc::clone(&controller)]) {
        error!("Failed to register controller: {}", e);
        std::process::exit(1);
    }

    // Start health server if requested
    let prometheus_handle = match server::setup_metrics() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to setup metrics: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(addr) = args.health_server.as_deref() {
        let health_server = match server::HealthServer::new(
            addr,
            prometheus_handle,
            Arc::clone(&controller),
            VERSION.to_string(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                error!("Failed to start health server: {}", e);
                std::process::exit(1);
            }
        };
        tokio::spawn(async move {
            if let Err(e) = health_server.serve().await {
                error!("Health server error: {}", e);
            }
        });
    }

    Arc::clone(&controller).run().await;
    controller.schedule_apply_config();

    shutdown_signal().await;
    info!("Shutting down");

    if let Err(e) = controller.stop().await {
        error!("Error during shutdown: {}", e);
    }
}
