use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use anyhow::{Context, Result};
use std::path::Path;
use crate::checker::DEFAULT_TIMEOUT;
use tokio::fs;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CheckerConfig {
    pub listen_port: u16,
    pub metrics_port: u16,
    pub timeout_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub enable_latency_history: bool,
    pub user_agent: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            listen_port: 3000,
            metrics_port: 9100,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            enable_latency_history: false, // current latency only
            user_agent: concat!("liveness-probe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl CheckerConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("timeout_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct ConfigManager {
    pub config: Arc<RwLock<CheckerConfig>>,
}

impl ConfigManager {
    pub async fn start() -> Result<Self> {
        let config_file = std::env::var("CHECKER_CONFIG")
            .unwrap_or_else(|_| "checker.json".to_string());

        if !Path::new(&config_file).exists() {
            println!("No config file at {}, using defaults", config_file);
            return Ok(Self::fixed(CheckerConfig::default()));
        }

        println!("Starting with local file: {}", config_file);

        let initial = Self::load_file_config(&config_file).await?;
        let config = Arc::new(RwLock::new(initial));

        let poll_interval_sec: u64 = std::env::var("CONFIG_POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        // Spawn background task to watch file for changes
        {
            let config_clone = config.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(poll_interval_sec)).await;
                    Self::reload(&config_file, &config_clone).await;
                }
            });
        }

        Ok(ConfigManager { config })
    }

    /// A manager that never reloads.
    pub fn fixed(config: CheckerConfig) -> Self {
        ConfigManager {
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn timeout(&self) -> Duration {
        self.config.read().await.timeout()
    }

    async fn reload(file_path: &str, current: &RwLock<CheckerConfig>) {
        match Self::load_file_config(file_path).await {
            Ok(new_cfg) => {
                let mut c = current.write().await;
                if *c != new_cfg {
                    if c.listen_port != new_cfg.listen_port || c.metrics_port != new_cfg.metrics_port {
                        tracing::warn!("Port changes in {} take effect on restart", file_path);
                    }
                    tracing::info!("Local config file updated");
                    *c = new_cfg;
                }
            }
            Err(e) => {
                tracing::error!("Error reading config file {}: {:?}", file_path, e);
            }
        }
    }

    async fn load_file_config(file_path: &str) -> Result<CheckerConfig> {
        let content = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading config file {}", file_path))?;
        let config: CheckerConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", file_path))?;
        config.validate()?;
        Ok(config)
    }
}
