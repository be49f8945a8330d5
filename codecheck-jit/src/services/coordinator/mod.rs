//! Code load coordinator
//!
//! Entry point for "make this jurisdiction's rules available". A trigger
//! either claims the jurisdiction (durable compare-and-set, see
//! [`begin_load`]) and spawns a background run, or reports the run already
//! in progress.
//!
//! # Stages
//! INIT → DISCOVERY → FETCH → EXTRACTION → PERSISTENCE
//!
//! Each stage lives in its own `stage_*` module. Stages degrade instead of
//! failing wherever a partial result is still useful; only the conditions in
//! [`LoadError`] end a run early.

use chrono::Utc;
use codecheck_common::config::TomlConfig;
use codecheck_common::events::{CodecheckEvent, EventBus};
use codecheck_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::rule_extractor::{AiExtractor, ClaudeClient, PatternExtractor};
use crate::agents::{CatalogDiscoverer, Discoverer, DocumentFetcher, Extractor, Fetcher, RuleExtractor, SqliteRuleWriter, Writer};
use crate::db::jobs;
use crate::db::jurisdiction_status::{begin_load, BeginLoad};
use crate::error::{Degradation, LoadError};
use crate::models::{AgentJob, JurisdictionRef, LoadSummary};
use crate::services::progress::{EventBusSink, JobRowSink, ProgressReporter, ProgressSink, Stage, TracingSink};

mod stage_discovery;
mod stage_extraction;
mod stage_fetch;
mod stage_persistence;

/// Tunables taken from `[pipeline]`
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub extraction_concurrency: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            fetch_concurrency: 4,
            extraction_concurrency: 2,
        }
    }
}

impl From<&codecheck_common::config::PipelineConfig> for CoordinatorSettings {
    fn from(config: &codecheck_common::config::PipelineConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            fetch_concurrency: config.fetch_concurrency.max(1),
            extraction_concurrency: config.extraction_concurrency.max(1),
        }
    }
}

/// A load trigger
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub jurisdiction: JurisdictionRef,
    /// Reload even when rules are already cached
    pub refresh: bool,
}

impl LoadRequest {
    pub fn new(jurisdiction: JurisdictionRef) -> Self {
        Self {
            jurisdiction,
            refresh: false,
        }
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// This trigger started a new run
    Initiated,
    /// A run was already in progress
    Loading,
    /// Rules are cached and no refresh was requested
    AlreadyLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub outcome: LoadOutcome,
    pub job_id: Option<Uuid>,
}

pub struct Coordinator {
    db: SqlitePool,
    event_bus: EventBus,
    discoverer: Arc<dyn Discoverer>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<RuleExtractor>,
    writer: Arc<dyn Writer>,
    settings: CoordinatorSettings,
    extra_sinks: Vec<Arc<dyn ProgressSink>>,
    cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl Coordinator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        discoverer: Arc<dyn Discoverer>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<RuleExtractor>,
        writer: Arc<dyn Writer>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            db,
            event_bus,
            discoverer,
            fetcher,
            extractor,
            writer,
            settings,
            extra_sinks: Vec::new(),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Production wiring from configuration
    ///
    /// `ai_api_key` is the already-resolved credential; without one the AI
    /// path is left out and every run records `ConfigurationDegraded`.
    pub fn from_config(
        db: SqlitePool,
        event_bus: EventBus,
        config: &TomlConfig,
        ai_api_key: Option<String>,
    ) -> Result<Self> {
        let discoverer = CatalogDiscoverer::from_config(&config.discovery)?;

        let fetcher = DocumentFetcher::new(&config.fetch, config.pipeline.fetch_timeout())
            .map_err(|e| codecheck_common::Error::Config(format!("document fetcher: {}", e)))?;

        let primary: Option<Arc<dyn Extractor>> = match ai_api_key {
            Some(key) => {
                let client = ClaudeClient::new(&config.ai, Some(key), config.pipeline.extraction_timeout())
                    .map_err(|e| codecheck_common::Error::Config(format!("AI client: {}", e)))?;
                tracing::info!(model = %config.ai.model, "AI extraction enabled");
                let ai: Arc<dyn Extractor> = Arc::new(AiExtractor::new(Arc::new(client)));
                Some(ai)
            }
            None => {
                tracing::warn!("No AI API key configured, rules will be extracted by pattern matching only");
                None
            }
        };
        let extractor = RuleExtractor::new(
            primary,
            Arc::new(PatternExtractor::new()),
            config.pipeline.extraction_timeout(),
            config.pipeline.confidence_threshold,
        );

        Ok(Self::new(
            db.clone(),
            event_bus,
            Arc::new(discoverer),
            Arc::new(fetcher),
            Arc::new(extractor),
            Arc::new(SqliteRuleWriter::new(db)),
            CoordinatorSettings::from(&config.pipeline),
        ))
    }

    /// Add a progress sink that every run reports to
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    pub fn ai_enabled(&self) -> bool {
        self.extractor.has_primary()
    }

    /// Number of runs executing in this process
    pub async fn active_runs(&self) -> usize {
        self.cancellation_tokens.read().await.len()
    }

    /// Idempotent load trigger
    ///
    /// At most one run exists per jurisdiction: a trigger that loses the
    /// status transition returns the running job instead of starting a
    /// second one.
    pub async fn load_codes(self: &Arc<Self>, request: LoadRequest) -> Result<LoadTicket> {
        let jurisdiction_id = request.jurisdiction.id.clone();

        let job = match begin_load(&self.db, &jurisdiction_id, request.refresh).await? {
            BeginLoad::Started(job) => job,
            BeginLoad::AlreadyLoading(job_id) => {
                tracing::info!(jurisdiction_id = %jurisdiction_id, job_id = ?job_id, "Load already in progress");
                return Ok(LoadTicket {
                    outcome: LoadOutcome::Loading,
                    job_id,
                });
            }
            BeginLoad::AlreadyLoaded => {
                tracing::debug!(jurisdiction_id = %jurisdiction_id, "Rules already cached");
                let latest = jobs::latest_job(&self.db, &jurisdiction_id).await?;
                return Ok(LoadTicket {
                    outcome: LoadOutcome::AlreadyLoaded,
                    job_id: latest.map(|job| job.id),
                });
            }
        };

        let job_id = job.id;
        let token = CancellationToken::new();
        self.cancellation_tokens.write().await.insert(job_id, token.clone());

        tracing::info!(
            job_id = %job_id,
            jurisdiction_id = %jurisdiction_id,
            refresh = request.refresh,
            "Code load initiated"
        );

        let this = Arc::clone(self);
        let jurisdiction = request.jurisdiction;
        tokio::spawn(async move {
            this.run_job(job, jurisdiction, token).await;
        });

        Ok(LoadTicket {
            outcome: LoadOutcome::Initiated,
            job_id: Some(job_id),
        })
    }

    /// Administrative cancellation
    ///
    /// Fails the job and releases the jurisdiction immediately; the
    /// background run stops at its next checkpoint. Returns false if the job
    /// had already finished.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let job = jobs::get_job(&self.db, job_id)
            .await?
            .ok_or_else(|| codecheck_common::Error::NotFound(format!("Job {} not found", job_id)))?;

        if job.status.is_terminal() {
            return Ok(false);
        }

        if let Some(token) = self.cancellation_tokens.read().await.get(&job_id) {
            token.cancel();
        }

        let message = LoadError::Cancelled.to_string();
        let changed = jobs::fail_job(&self.db, job_id, &job.jurisdiction_id, &message).await?;
        if changed {
            tracing::warn!(job_id = %job_id, jurisdiction_id = %job.jurisdiction_id, "Code load cancelled");
            self.event_bus.emit_lossy(CodecheckEvent::LoadFailed {
                job_id,
                jurisdiction_id: job.jurisdiction_id,
                error_message: message,
                timestamp: Utc::now(),
            });
        }
        Ok(changed)
    }

    fn reporter(&self, job_id: Uuid, jurisdiction_id: &str) -> ProgressReporter {
        let mut sinks: Vec<Arc<dyn ProgressSink>> = vec![
            Arc::new(JobRowSink::new(self.db.clone())),
            Arc::new(TracingSink),
            Arc::new(EventBusSink::new(self.event_bus.clone())),
        ];
        sinks.extend(self.extra_sinks.iter().cloned());
        ProgressReporter::new(job_id, jurisdiction_id, sinks)
    }

    /// Execute one claimed run to a terminal state
    async fn run_job(&self, job: AgentJob, jurisdiction: JurisdictionRef, cancel: CancellationToken) {
        let job_id = job.id;
        let start_time = std::time::Instant::now();

        self.event_bus.emit_lossy(CodecheckEvent::LoadStarted {
            job_id,
            jurisdiction_id: jurisdiction.id.clone(),
            timestamp: Utc::now(),
        });

        let reporter = self.reporter(job_id, &jurisdiction.id);
        let outcome = self.run_pipeline(job_id, &jurisdiction, &reporter, &cancel).await;
        self.finish(job_id, &jurisdiction.id, outcome, start_time).await;

        self.cancellation_tokens.write().await.remove(&job_id);
    }

    async fn run_pipeline(
        &self,
        job_id: Uuid,
        jurisdiction: &JurisdictionRef,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> std::result::Result<LoadSummary, LoadError> {
        if !jobs::mark_running(&self.db, job_id).await? {
            // Cancelled between the trigger and the spawn
            return Err(LoadError::Cancelled);
        }

        let mut summary = LoadSummary::default();
        reporter.stage(Stage::Init, 0.0, "Starting code load").await;

        if !self.extractor.has_primary() {
            summary.degradations.push(Degradation::ConfigurationDegraded {
                reason: "AI extraction not configured; using pattern extraction only".to_string(),
            });
        }
        reporter.stage(Stage::Init, 1.0, "Initialized").await;
        check_cancelled(cancel)?;

        let sources = self.stage_discovery(jurisdiction, reporter, &mut summary).await;
        check_cancelled(cancel)?;

        let documents = self.stage_fetch(sources, reporter, &mut summary, cancel).await?;
        check_cancelled(cancel)?;

        let rules = self.stage_extraction(documents, reporter, &mut summary, cancel).await?;
        check_cancelled(cancel)?;

        self.stage_persistence(&jurisdiction.id, rules, reporter, &mut summary).await?;
        Ok(summary)
    }

    async fn finish(
        &self,
        job_id: Uuid,
        jurisdiction_id: &str,
        outcome: std::result::Result<LoadSummary, LoadError>,
        start_time: std::time::Instant,
    ) {
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(summary) => {
                match jobs::complete_job(&self.db, job_id, &summary).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, "Job ended elsewhere before completion was recorded");
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record job completion");
                    }
                }

                tracing::info!(
                    job_id = %job_id,
                    jurisdiction_id,
                    rules = summary.rules_count,
                    sources_used = summary.sources_used,
                    degradations = summary.degradations.len(),
                    duration_ms,
                    "Code load completed"
                );

                self.event_bus.emit_lossy(CodecheckEvent::LoadCompleted {
                    job_id,
                    jurisdiction_id: jurisdiction_id.to_string(),
                    rules_count: summary.rules_count,
                    degradations: summary.degradations.len(),
                    timestamp: Utc::now(),
                });
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(
                    job_id = %job_id,
                    jurisdiction_id,
                    kind = error.kind(),
                    error = %message,
                    duration_ms,
                    "Code load failed"
                );

                match jobs::fail_job(&self.db, job_id, jurisdiction_id, &message).await {
                    Ok(true) => {
                        self.event_bus.emit_lossy(CodecheckEvent::LoadFailed {
                            job_id,
                            jurisdiction_id: jurisdiction_id.to_string(),
                            error_message: message,
                            timestamp: Utc::now(),
                        });
                    }
                    // Already failed by cancellation or stale recovery
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
                    }
                }
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> std::result::Result<(), LoadError> {
    if cancel.is_cancelled() {
        Err(LoadError::Cancelled)
    } else {
        Ok(())
    }
}
