// src/state.rs

use crate::config::{load_config, AppConfig};
use crate::error::{AppError, Result};
use crate::handlers::{default_chain, processor::ResponseProcessor};
use crate::pool::KeyPool;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Request counters for the `/health` and `/status` surfaces.
#[derive(Debug)]
pub struct RequestStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: i64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
}

impl RequestStats {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.failed.load(Ordering::Relaxed),
            success_rate: (success_rate * 100.0).round() / 100.0,
        }
    }
}

/// Shared application state accessible by all handlers.
///
/// The configuration and the pool are immutable snapshots behind swap slots:
/// a reload builds a complete replacement and swaps both atomically, instead
/// of mutating individual fields in place.
pub struct AppState {
    config: RwLock<Arc<AppConfig>>,
    pool: RwLock<Arc<KeyPool>>,
    client: Client,
    processor: ResponseProcessor,
    config_path: PathBuf,
    pub stats: RequestStats,
}

impl AppState {
    /// Creates a new `AppState`: builds the key pool and the shared HTTP
    /// client. The per-request upstream timeout is applied at dispatch time,
    /// not on the client builder.
    pub fn new(config: AppConfig, config_path: &Path) -> Result<Self> {
        info!("Creating shared AppState: initializing key pool and HTTP client...");

        let key_count = config.resolved_keys().len().max(10);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.server.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(key_count)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        let pool = KeyPool::from_config(&config);

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            pool: RwLock::new(Arc::new(pool)),
            client,
            processor: ResponseProcessor::new(default_chain()),
            config_path: config_path.to_path_buf(),
            stats: RequestStats::new(),
        })
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> Arc<AppConfig> {
        self.config.read().await.clone()
    }

    /// Current key pool.
    pub async fn pool(&self) -> Arc<KeyPool> {
        self.pool.read().await.clone()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn processor(&self) -> &ResponseProcessor {
        &self.processor
    }

    /// Re-reads the config file, validates it, and atomically replaces both
    /// the configuration snapshot and the pool. Key health state is rebuilt
    /// from scratch, matching the semantics of a restart.
    pub async fn reload(&self) -> Result<usize> {
        let new_config = load_config(&self.config_path).map_err(|e| {
            error!(error = ?e, "Configuration reload failed; keeping current state");
            e
        })?;

        let key_count = new_config.resolved_keys().len();
        let new_pool = Arc::new(KeyPool::from_config(&new_config));
        let new_config = Arc::new(new_config);

        // Hold both write guards so no request observes a new config with the
        // old pool or vice versa.
        let mut config_guard = self.config.write().await;
        let mut pool_guard = self.pool.write().await;
        *config_guard = new_config;
        *pool_guard = new_pool;

        info!(keys = key_count, "Configuration reloaded, pool replaced atomically");
        Ok(key_count)
    }
}
