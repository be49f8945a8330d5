//! Shared fixtures for codecheck-jit integration tests
//!
//! Temporary SQLite databases plus stub agents that fail, hang or record on
//! demand. Each test binary uses a different subset.

#![allow(dead_code)]

use async_trait::async_trait;
use codecheck_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use codecheck_jit::agents::rule_extractor::{AiExtractor, CompletionProvider, PatternExtractor};
use codecheck_jit::agents::{
    CatalogDiscoverer, Discoverer, DiscoveryError, DocumentFetcher, ExtractionError, Extractor, FetchError,
    Fetcher, PersistError, RuleExtractor, SqliteRuleWriter, Writer,
};
use codecheck_jit::db::jobs;
use codecheck_jit::models::{AgentJob, CodeSource, ExtractedRule, FetchedDocument, JurisdictionRef};
use codecheck_jit::services::{Coordinator, CoordinatorSettings, ProgressSink, ProgressUpdate};

pub const BOULDER: &str = "boulder-co";

/// Temporary file-backed database with tables created
pub async fn test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = codecheck_jit::db::init_database_pool(&dir.path().join("codecheck.db"))
        .await
        .expect("Failed to initialize test database");
    (dir, pool)
}

pub fn boulder() -> JurisdictionRef {
    JurisdictionRef::new(BOULDER, "Boulder").with_state("CO").with_kind("city")
}

/// Discoverer returning a fixed answer
pub enum FixedDiscoverer {
    Sources(Vec<CodeSource>),
    Fails,
}

#[async_trait]
impl Discoverer for FixedDiscoverer {
    async fn discover(&self, _jurisdiction: &JurisdictionRef) -> Result<Vec<CodeSource>, DiscoveryError> {
        match self {
            FixedDiscoverer::Sources(sources) => Ok(sources.clone()),
            FixedDiscoverer::Fails => Err(DiscoveryError::Lookup("catalog offline".to_string())),
        }
    }
}

/// Bundled-excerpt fetcher with injectable failures and latency
pub struct StubFetcher {
    inner: DocumentFetcher,
    failing_families: HashSet<String>,
    delay: Option<Duration>,
}

impl StubFetcher {
    pub fn working() -> Self {
        Self {
            inner: DocumentFetcher::bundled_only(100),
            failing_families: HashSet::new(),
            delay: None,
        }
    }

    pub fn failing(families: &[&str]) -> Self {
        Self {
            failing_families: families.iter().map(|f| f.to_string()).collect(),
            ..Self::working()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::working()
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, source: &CodeSource) -> Result<FetchedDocument, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_families.contains(&source.code_family) {
            return Err(FetchError::Status {
                status: 503,
                url: source.locator.clone(),
            });
        }
        self.inner.fetch(source).await
    }
}

/// Completion provider that is configured but always errors
pub struct FailingProvider;

#[async_trait]
impl CompletionProvider for FailingProvider {
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ExtractionError> {
        Err(ExtractionError::Api {
            status: 500,
            body: "internal error".to_string(),
        })
    }
}

/// Writer that always fails, leaving stored state untouched
pub struct FailingWriter;

#[async_trait]
impl Writer for FailingWriter {
    async fn persist(&self, jurisdiction_id: &str, _rules: &[ExtractedRule]) -> Result<usize, PersistError> {
        Err(PersistError::StatusConflict(jurisdiction_id.to_string()))
    }
}

/// Sink keeping every update for later inspection
#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingSink {
    pub fn percentages(&self, job_id: Uuid) -> Vec<u8> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.job_id == job_id)
            .map(|u| u.percentage)
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn report(&self, update: &ProgressUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

/// Coordinator assembled from parts, with production defaults for any part
/// left unset
pub struct CoordinatorBuilder {
    pool: SqlitePool,
    event_bus: EventBus,
    discoverer: Arc<dyn Discoverer>,
    fetcher: Arc<dyn Fetcher>,
    primary: Option<Arc<dyn Extractor>>,
    writer: Option<Arc<dyn Writer>>,
    sink: Option<Arc<dyn ProgressSink>>,
    settings: CoordinatorSettings,
}

impl CoordinatorBuilder {
    pub fn new(pool: &SqlitePool) -> Self {
        Self {
            pool: pool.clone(),
            event_bus: EventBus::new(256),
            discoverer: Arc::new(CatalogDiscoverer::new()),
            fetcher: Arc::new(StubFetcher::working()),
            primary: None,
            writer: None,
            sink: None,
            settings: CoordinatorSettings {
                fetch_timeout: Duration::from_secs(5),
                fetch_concurrency: 4,
                extraction_concurrency: 2,
            },
        }
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn discoverer(mut self, discoverer: impl Discoverer + 'static) -> Self {
        self.discoverer = Arc::new(discoverer);
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// AI extraction backed by a provider that always errors
    pub fn failing_ai(mut self) -> Self {
        let ai: Arc<dyn Extractor> = Arc::new(AiExtractor::new(Arc::new(FailingProvider)));
        self.primary = Some(ai);
        self
    }

    pub fn writer(mut self, writer: impl Writer + 'static) -> Self {
        let writer: Arc<dyn Writer> = Arc::new(writer);
        self.writer = Some(writer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.settings.fetch_timeout = timeout;
        self
    }

    pub fn build(self) -> Coordinator {
        let extractor = RuleExtractor::new(
            self.primary,
            Arc::new(PatternExtractor::new()),
            Duration::from_secs(5),
            0.5,
        );
        let writer: Arc<dyn Writer> = match self.writer {
            Some(writer) => writer,
            None => Arc::new(SqliteRuleWriter::new(self.pool.clone())),
        };

        let coordinator = Coordinator::new(
            self.pool,
            self.event_bus,
            self.discoverer,
            self.fetcher,
            Arc::new(extractor),
            writer,
            self.settings,
        );
        match self.sink {
            Some(sink) => coordinator.with_progress_sink(sink),
            None => coordinator,
        }
    }

    pub fn build_arc(self) -> Arc<Coordinator> {
        Arc::new(self.build())
    }
}

/// Poll until the job is completed or failed
pub async fn wait_for_terminal(pool: &SqlitePool, job_id: Uuid) -> AgentJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let job = jobs::get_job(pool, job_id)
            .await
            .expect("Failed to read job")
            .expect("Job row missing");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "Job {} did not finish, last status {}",
            job_id,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the coordinator has no runs left in this process
pub async fn wait_for_idle(coordinator: &Coordinator) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while coordinator.active_runs().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "Coordinator never went idle");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
