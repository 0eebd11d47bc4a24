mod api;
mod checker;
mod config;
mod metrics;

use api::ApiContext;
use checker::LivenessChecker;
use config::{ConfigManager, LogFormat};
use metrics::initialize_metrics;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    // Load config first to get log level
    let config_mgr = Arc::new(ConfigManager::start().await?);
    let cfg = config_mgr.config.read().await.clone();
    cfg.validate()?;
    let log_level = cfg.get_tracing_level()?;

    println!("Starting liveness_probe");

    initialize_metrics(cfg.enable_latency_history)?;

    // Init tracing with configured log level
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("liveness_probe={}", log_level.as_str().to_lowercase()).parse()?);
    match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let metrics_addr: SocketAddr = ([0, 0, 0, 0], cfg.metrics_port).into();
    let listen_addr: SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    api::ensure_bindable(metrics_addr, "metrics").await?;
    api::ensure_bindable(listen_addr, "check").await?;

    // Start metrics endpoint
    tokio::spawn(metrics::serve_metrics(metrics_addr));
    info!("metrics listening on {}", metrics_addr);

    let ctx = ApiContext {
        client: LivenessChecker::build_client(&cfg.user_agent)?,
        config: config_mgr.clone(),
    };
    info!("checks bounded by {:?}", cfg.timeout());

    api::serve(listen_addr, ctx).await;

    Ok(())
}
