#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use hotdog_pipeline::clock::{Clock, ManualClock};
use hotdog_pipeline::config::{
    AppConfig, PipelineConfig, PlatformConfig, PlatformSource, StoreBackend,
};
use hotdog_pipeline::db::{self, PgPool, MIGRATIONS};
use hotdog_pipeline::hashing::{content_hash, similarity_key, HashInput};
use hotdog_pipeline::models::{ContentItem, ContentType, NewContent, Platform, RawItem};
use hotdog_pipeline::pipeline::{Pipeline, PipelineStores};
use hotdog_pipeline::routes;
use hotdog_pipeline::scanning::{PlatformScanner, ScannerRegistry};
use hotdog_pipeline::state::AppState;
use hotdog_pipeline::store::{ContentStore, MemoryStore, PgStore};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tower::util::ServiceExt;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static URL_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Monday 2024-06-03 10:00 in New York, between breakfast and lunch.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
}

/// Lets a test hold a search call open until it decides to release it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct FakeScanner {
    responses: Mutex<HashMap<String, std::result::Result<Vec<RawItem>, String>>>,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Gate>>,
}

impl FakeScanner {
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub async fn respond(&self, term: &str, items: Vec<RawItem>) {
        self.responses
            .lock()
            .await
            .insert(term.to_string(), Ok(items));
    }

    pub async fn fail(&self, term: &str, message: &str) {
        self.responses
            .lock()
            .await
            .insert(term.to_string(), Err(message.to_string()));
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PlatformScanner for FakeScanner {
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<RawItem>> {
        self.calls.lock().await.push(term.to_string());
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match self.responses.lock().await.get(term) {
            Some(Ok(items)) => Ok(items.iter().take(limit).cloned().collect()),
            Some(Err(message)) => Err(anyhow!(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

pub fn raw(text: &str, image_url: Option<&str>, original_url: &str) -> RawItem {
    RawItem {
        text: (!text.is_empty()).then(|| text.to_string()),
        image_url: image_url.map(str::to_string),
        original_url: original_url.to_string(),
        ..RawItem::default()
    }
}

/// Reddit and Instagram authenticated, YouTube missing its key, Giphy
/// disabled, Tumblr absent.
pub fn test_config() -> PipelineConfig {
    let mut giphy = PlatformConfig::new(PlatformSource::Giphy {
        search_terms: vec!["hotdog".into()],
        api_key: Some("key".into()),
    });
    giphy.is_enabled = false;

    PipelineConfig {
        platforms: vec![
            PlatformConfig::new(PlatformSource::Reddit {
                subreddits: Vec::new(),
                search_terms: vec!["hotdog".into(), "chili dog".into()],
                client_id: Some("client".into()),
                client_secret: Some("secret".into()),
            }),
            PlatformConfig::new(PlatformSource::Instagram {
                hashtags: vec!["hotdog".into()],
                access_token: Some("token".into()),
            }),
            PlatformConfig::new(PlatformSource::Youtube {
                search_terms: vec!["hotdog".into()],
                api_key: None,
            }),
            giphy,
        ],
        ..PipelineConfig::default()
    }
}

pub struct TestPipeline {
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub pipeline: Pipeline,
    pub scanners: HashMap<Platform, Arc<FakeScanner>>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let scanners = HashMap::from([
            (Platform::Reddit, Arc::new(FakeScanner::default())),
            (Platform::Instagram, Arc::new(FakeScanner::default())),
        ]);
        Self::with_scanners(config, scanners, Duration::from_secs(5))
    }

    pub fn with_scanners(
        config: PipelineConfig,
        scanners: HashMap<Platform, Arc<FakeScanner>>,
        timeout: Duration,
    ) -> Self {
        let clock = ManualClock::new(start_time());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(shared_clock.clone()));
        let registry: ScannerRegistry = scanners
            .iter()
            .map(|(platform, scanner)| {
                let scanner: Arc<dyn PlatformScanner> = scanner.clone();
                (*platform, scanner)
            })
            .collect();
        let pipeline = Pipeline::new(
            PipelineStores::shared(store.clone()),
            Arc::new(config),
            registry,
            shared_clock,
            timeout,
        )
        .expect("pipeline builds");
        Self {
            clock,
            store,
            pipeline,
            scanners,
        }
    }

    pub fn scanner(&self, platform: Platform) -> Arc<FakeScanner> {
        self.scanners
            .get(&platform)
            .cloned()
            .expect("scanner registered")
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(chrono::Duration::hours(hours));
    }

    /// Inserts content directly, bypassing scanning.
    pub async fn seed(
        &self,
        platform: Platform,
        text: &str,
        image_url: Option<&str>,
        confidence: f64,
        approved: bool,
    ) -> Result<ContentItem> {
        let url = format!(
            "https://{}.example/post/{}",
            platform,
            URL_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let input = HashInput {
            platform,
            text: Some(text),
            image_url,
            video_url: None,
            original_url: &url,
            author: None,
        };
        let item = self
            .store
            .create(NewContent {
                content_hash: content_hash(&input),
                similarity_key: similarity_key(&input),
                text: Some(text.to_string()),
                image_url: image_url.map(str::to_string),
                video_url: None,
                content_type: ContentType::infer(image_url, None),
                source_platform: platform,
                original_url: url.clone(),
                original_author: None,
                scraped_at: self.clock.now(),
                is_approved: approved,
                is_rejected: false,
                confidence_score: confidence,
                rejection_reason: None,
                admin_notes: None,
                flagged_patterns: Vec::new(),
                engagement: None,
            })
            .await?;
        Ok(item)
    }

    pub fn app(&self) -> TestApp {
        let config = AppConfig {
            store_backend: StoreBackend::Memory,
            database_url: None,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            pipeline_config_path: None,
            scanner_gateway_url: None,
            scanner_timeout_secs: 5,
            worker_poll_secs: 30,
        };
        let state = AppState::new(config, self.pipeline.clone(), None);
        TestApp {
            router: routes::create_router(state.clone()),
            state,
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload).await
    }

    pub async fn post(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::POST, path).await
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

/// A migrated, truncated Postgres store, or `None` when `TEST_DATABASE_URL`
/// is unset.
pub async fn postgres_store(clock: Arc<dyn Clock>) -> Result<Option<(PgStore, PgPool)>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };
    let pool = db::init_pool_with_size(&database_url, db::DEFAULT_MAX_POOL_SIZE)?;
    prepare_database(&pool).await?;
    Ok(Some((PgStore::new(pool.clone(), clock), pool)))
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE posted_content, schedule_slots, queue_alerts, scan_history, content_queue RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
