use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::collector::ArticleSource;
use crate::curation::{CurationEngine, CurationError};
use crate::models::{Digest, DigestStats};
use crate::notifier::{stats_line, Notifier};
use crate::store::{DigestStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Collecting,
    Curating,
    Persisting,
    Notifying,
    Done,
    Aborted,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Collecting => "collecting",
            Stage::Curating => "curating",
            Stage::Persisting => "persisting",
            Stage::Notifying => "notifying",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already in progress")]
    AlreadyRunning,
    #[error("curation failed: {0}")]
    Curation(#[from] CurationError),
    #[error("persisting the digest failed: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub stats: DigestStats,
    pub digest: Digest,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Nothing was collected; the model was not called and nothing was saved.
    Aborted,
    Completed(RunReport),
}

/// Collect, curate, persist and optionally notify, strictly in that order.
pub struct Pipeline {
    source: Arc<dyn ArticleSource>,
    engine: CurationEngine,
    store: Arc<DigestStore>,
    notifier: Option<Arc<dyn Notifier>>,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        engine: CurationEngine,
        store: Arc<DigestStore>,
    ) -> Self {
        Self {
            source,
            engine,
            store,
            notifier: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<DigestStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Runs the pipeline once. Overlapping runs are refused with
    /// `PipelineError::AlreadyRunning`.
    ///
    /// The run guard is released when this future completes or is dropped.
    pub async fn run(&self, notify: bool) -> Result<RunOutcome, PipelineError> {
        let _guard = self.running.try_lock().map_err(|_| {
            warn!("Pipeline run already in progress, refusing to start another");
            PipelineError::AlreadyRunning
        })?;

        let started = Instant::now();
        let result = self.execute(notify).await;

        match &result {
            Ok(RunOutcome::Completed(report)) => info!(
                date = %report.date,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline finished: {}",
                stats_line(&report.stats)
            ),
            Ok(RunOutcome::Aborted) => {}
            Err(e) => {
                enter(Stage::Failed);
                error!("Pipeline run failed: {}", e);
            }
        }
        result
    }

    async fn execute(&self, notify: bool) -> Result<RunOutcome, PipelineError> {
        enter(Stage::Idle);

        enter(Stage::Collecting);
        let raw = self.source.collect().await;
        if raw.is_empty() {
            info!("No new articles in the window, nothing to curate");
            enter(Stage::Aborted);
            return Ok(RunOutcome::Aborted);
        }

        enter(Stage::Curating);
        let digest = self.engine.curate(&raw).await?;

        enter(Stage::Persisting);
        let now = Utc::now();
        let path = self.store.save_at(&digest, &raw, now).await?;
        let date = now.date_naive();

        if notify {
            if let Some(notifier) = &self.notifier {
                enter(Stage::Notifying);
                // the digest is already saved; a failed delivery does not undo it
                if let Err(e) = notifier.notify(&digest, date).await {
                    error!(date = %date, "Notification failed: {}", e);
                }
            }
        }

        enter(Stage::Done);
        Ok(RunOutcome::Completed(RunReport {
            date,
            path,
            stats: DigestStats::compute(&digest, &raw),
            digest,
        }))
    }
}

fn enter(stage: Stage) {
    info!(stage = %stage, "Pipeline stage");
}
