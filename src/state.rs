use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::{
    clock::{system_clock, Clock},
    config::{AppConfig, PipelineConfig, StoreBackend},
    db::{self, PgPool},
    pipeline::{Pipeline, PipelineStores},
    scanning::{HttpScanner, PlatformScanner, ScannerRegistry},
    store::{MemoryStore, PgStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Pipeline,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Pipeline, pool: Option<PgPool>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            pool,
        }
    }

    /// Builds the configured store backend, scanners and pipeline.
    /// Postgres migrations run before the state is returned.
    pub async fn build(config: AppConfig, pool_size: u32) -> anyhow::Result<Self> {
        let pipeline_config = Arc::new(PipelineConfig::load(
            config.pipeline_config_path.as_deref(),
        )?);
        let clock = system_clock();
        let scanners = build_scanners(&config, &pipeline_config)?;

        let (stores, pool) = match config.store_backend {
            StoreBackend::Memory => (
                PipelineStores::shared(Arc::new(MemoryStore::new(clock.clone()))),
                None,
            ),
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set for the postgres backend")?;
                let pool = db::init_pool_with_size(url, pool_size)?;
                db::run_migrations(&pool).await?;
                (
                    PipelineStores::shared(Arc::new(PgStore::new(pool.clone(), clock.clone()))),
                    Some(pool),
                )
            }
        };

        let pipeline = Pipeline::new(
            stores,
            pipeline_config,
            scanners,
            clock,
            config.scanner_timeout(),
        )?;
        Ok(Self::new(config, pipeline, pool))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.pipeline.clock.now()
    }
}

/// One gateway-backed scanner per configured platform. Without a gateway
/// no scanners are registered and scans fail with `NoScanner`.
pub fn build_scanners(
    config: &AppConfig,
    pipeline: &PipelineConfig,
) -> anyhow::Result<ScannerRegistry> {
    let mut scanners = ScannerRegistry::new();
    let Some(gateway) = config.scanner_gateway_url.as_deref() else {
        tracing::warn!("SCANNER_GATEWAY_URL not set; platform scans are unavailable");
        return Ok(scanners);
    };
    for platform_config in &pipeline.platforms {
        let platform = platform_config.platform();
        let scanner: Arc<dyn PlatformScanner> = Arc::new(HttpScanner::new(
            gateway,
            platform,
            config.scanner_timeout(),
        )?);
        scanners.insert(platform, scanner);
    }
    Ok(scanners)
}
