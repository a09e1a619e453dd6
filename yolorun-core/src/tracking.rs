//! Experiment-tracking sessions.
//!
//! A run opens exactly one session and closes it exactly once on every path that
//! returns, success or error. [`TrackingSession`] enforces the "once" half; the
//! orchestrator is responsible for reaching `finish`.
//!
//! A panic in a collaborator unwinds past the orchestrator without calling
//! `finish`. `Drop` cannot await, so the session is then left open at the
//! tracker and only a warning is logged.

use crate::error::{Result, RunError};
use crate::identity::RunIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tag applied to runs whose name marks them as tests.
pub const TEST_TAG: &str = "test";

/// Whether a run is filed as a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Tagged,
    Untagged,
}

impl Classification {
    pub fn tags(self) -> Vec<String> {
        match self {
            Classification::Tagged => vec![TEST_TAG.to_string()],
            Classification::Untagged => Vec::new(),
        }
    }
}

/// Tagged iff the name contains `"test"` or `"Test"`. Other casings such as
/// `"TEST"` do not count.
pub fn classify(run_name: &str) -> Classification {
    if run_name.contains("Test") || run_name.contains("test") {
        Classification::Tagged
    } else {
        Classification::Untagged
    }
}

/// An experiment-tracking service.
#[async_trait]
pub trait ExperimentTracker: Send {
    /// Open a run record.
    async fn init(&mut self, project: &str, name: &str, tags: &[String]) -> Result<()>;

    /// Close the run record opened by `init`.
    async fn finish(&mut self) -> Result<()>;
}

/// Opens tracking sessions under a fixed project namespace.
pub struct TrackingStage {
    project: String,
}

impl TrackingStage {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }

    /// Open the run's session. Failures are not contained here.
    pub async fn start(
        &self,
        mut tracker: Box<dyn ExperimentTracker>,
        run: &RunIdentity,
        classification: Classification,
    ) -> Result<TrackingSession> {
        let tags = classification.tags();
        tracker
            .init(&self.project, run.as_str(), &tags)
            .await
            .map_err(|e| match e {
                RunError::TrackingOpen(_) => e,
                other => RunError::TrackingOpen(other.to_string()),
            })?;
        info!(project = %self.project, ?tags, "Tracking session opened");
        Ok(TrackingSession {
            tracker,
            run_name: run.as_str().to_string(),
            finished: false,
        })
    }
}

/// Handle to an open tracking run.
pub struct TrackingSession {
    tracker: Box<dyn ExperimentTracker>,
    run_name: String,
    finished: bool,
}

impl TrackingSession {
    /// Close the session. Only the first call reaches the tracker; later calls
    /// return `Ok(())` without doing anything.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            debug!(run = %self.run_name, "Tracking session already finished");
            return Ok(());
        }
        self.finished = true;
        self.tracker.finish().await.map_err(|e| match e {
            RunError::TrackingFinish(_) => e,
            other => RunError::TrackingFinish(other.to_string()),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run = %self.run_name, "Tracking session dropped without being finished");
        }
    }
}

/// Status of a locally tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
}

/// One run record of the local tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Distinguishes repeated runs that share a name.
    pub id: Uuid,
    pub name: String,
    pub project: String,
    pub tags: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// File-backed tracker: one JSON record per run under `<store>/<project>/`.
pub struct LocalTracker {
    store_dir: PathBuf,
    current: Option<(PathBuf, RunRecord)>,
}

impl LocalTracker {
    pub fn new(store_dir: PathBuf) -> Self {
        Self {
            store_dir,
            current: None,
        }
    }

    pub fn record_path(&self, project: &str, name: &str) -> PathBuf {
        self.store_dir.join(project).join(format!("{name}.json"))
    }
}

#[async_trait]
impl ExperimentTracker for LocalTracker {
    async fn init(&mut self, project: &str, name: &str, tags: &[String]) -> Result<()> {
        let path = self.record_path(project, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RunError::TrackingOpen(format!("{}: {e}", parent.display())))?;
        }
        let record = RunRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            project: project.to_string(),
            tags: tags.to_vec(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        record
            .save(&path)
            .map_err(|e| RunError::TrackingOpen(e.to_string()))?;
        debug!(path = %path.display(), id = %record.id, "Run record written");
        self.current = Some((path, record));
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let (path, mut record) = self
            .current
            .take()
            .ok_or_else(|| RunError::TrackingFinish("no open run to finish".to_string()))?;
        record.status = RunStatus::Finished;
        record.finished_at = Some(Utc::now());
        record
            .save(&path)
            .map_err(|e| RunError::TrackingFinish(e.to_string()))
    }
}
