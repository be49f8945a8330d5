//! Progress reporting for code loads
//!
//! A run reports `(stage, fraction)` checkpoints to one [`ProgressReporter`],
//! which maps them onto fixed percentage bands and fans them out to every
//! registered [`ProgressSink`]:
//!
//! | stage       | band     |
//! |-------------|----------|
//! | init        | 0-5%     |
//! | discovery   | 5-33%    |
//! | fetch       | 33-66%   |
//! | extraction  | 66-95%   |
//! | persistence | 95-100%  |
//!
//! Percentages handed to sinks never decrease within one run.

use async_trait::async_trait;
use chrono::Utc;
use codecheck_common::events::{CodecheckEvent, EventBus};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::jobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Discovery,
    Fetch,
    Extraction,
    Persistence,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Discovery => "discovery",
            Stage::Fetch => "fetch",
            Stage::Extraction => "extraction",
            Stage::Persistence => "persistence",
        }
    }

    /// Inclusive percentage band of the stage
    pub fn band(&self) -> (u8, u8) {
        match self {
            Stage::Init => (0, 5),
            Stage::Discovery => (5, 33),
            Stage::Fetch => (33, 66),
            Stage::Extraction => (66, 95),
            Stage::Persistence => (95, 100),
        }
    }

    /// Overall percentage for `fraction` (clamped to 0..=1) of this stage
    pub fn percentage(&self, fraction: f64) -> u8 {
        let (low, high) = self.band();
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        low + ((high - low) as f64 * fraction).floor() as u8
    }
}

/// One checkpoint as delivered to sinks
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub jurisdiction_id: String,
    pub stage: Stage,
    pub percentage: u8,
    pub message: String,
}

/// Destination for progress checkpoints
///
/// Sinks handle their own failures; a broken sink never stops a run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: &ProgressUpdate);
}

/// Writes checkpoints to the job row (also the run's heartbeat)
pub struct JobRowSink {
    db: SqlitePool,
}

impl JobRowSink {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgressSink for JobRowSink {
    async fn report(&self, update: &ProgressUpdate) {
        match jobs::record_progress(&self.db, update.job_id, update.percentage, &update.message).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %update.job_id, "Progress ignored, job no longer running");
            }
            Err(e) => {
                tracing::warn!(job_id = %update.job_id, error = %e, "Failed to record job progress");
            }
        }
    }
}

/// Structured log line per checkpoint
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn report(&self, update: &ProgressUpdate) {
        tracing::info!(
            job_id = %update.job_id,
            jurisdiction_id = %update.jurisdiction_id,
            stage = update.stage.as_str(),
            percentage = update.percentage,
            "{}",
            update.message
        );
    }
}

/// Broadcasts checkpoints as `LoadProgress` events
pub struct EventBusSink {
    event_bus: EventBus,
}

impl EventBusSink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ProgressSink for EventBusSink {
    async fn report(&self, update: &ProgressUpdate) {
        self.event_bus.emit_lossy(CodecheckEvent::LoadProgress {
            job_id: update.job_id,
            jurisdiction_id: update.jurisdiction_id.clone(),
            stage: update.stage.as_str().to_string(),
            percentage: update.percentage,
            message: update.message.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Per-run fan-out with a monotonic high-water mark
pub struct ProgressReporter {
    job_id: Uuid,
    jurisdiction_id: String,
    sinks: Vec<Arc<dyn ProgressSink>>,
    /// Held across delivery so concurrent reports reach sinks in order
    high_water: Mutex<u8>,
}

impl ProgressReporter {
    pub fn new(job_id: Uuid, jurisdiction_id: impl Into<String>, sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self {
            job_id,
            jurisdiction_id: jurisdiction_id.into(),
            sinks,
            high_water: Mutex::new(0),
        }
    }

    /// Report progress through a stage; returns the percentage delivered
    pub async fn stage(&self, stage: Stage, fraction: f64, message: impl Into<String>) -> u8 {
        let mut high_water = self.high_water.lock().await;
        let percentage = stage.percentage(fraction).max(*high_water);
        *high_water = percentage;

        let update = ProgressUpdate {
            job_id: self.job_id,
            jurisdiction_id: self.jurisdiction_id.clone(),
            stage,
            percentage,
            message: message.into(),
        };
        for sink in &self.sinks {
            sink.report(&update).await;
        }
        percentage
    }

    pub async fn current(&self) -> u8 {
        *self.high_water.lock().await
    }
}
