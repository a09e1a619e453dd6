//! The training-run state machine.
//!
//! ```text
//! Init -> ConfigLoaded -> DirReady -> TrackingOpen -> EmissionsRunning
//!      -> Trained -> EmissionsStopped -> Evaluated -> Closed
//! ```
//!
//! Any stage whose policy is [`FailurePolicy::Abort`] moves the run to
//! `Errored` instead. Once the tracking session is open it is finished exactly
//! once on every path before the run returns.

use crate::config::PipelineConfig;
use crate::document::RunConfig;
use crate::emissions::{
    ActiveEmissions, EmissionsStage, EmissionsTrackerFactory, MonitorFactory, persist_emissions,
};
use crate::error::RunError;
use crate::identity::RunIdentity;
use crate::model::{DetectionModel, ModelOutput, UltralyticsCli};
use crate::stage::{FailurePolicy, Stage, policy_for};
use crate::tracking::{ExperimentTracker, LocalTracker, TrackingSession, TrackingStage, classify};
use crate::training;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ConfigLoaded,
    DirReady,
    TrackingOpen,
    EmissionsRunning,
    Trained,
    EmissionsStopped,
    Evaluated,
    Closed,
    Errored,
}

/// A stage failure the run continued past.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// What happened during one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_name: Option<RunIdentity>,
    pub results_dir: Option<PathBuf>,
    /// States entered, in order, starting with `Init`.
    pub states: Vec<RunState>,
    pub contained: Vec<StageFailure>,
    pub emissions_kg: Option<f64>,
    pub co2_log: Option<PathBuf>,
    pub training: Option<ModelOutput>,
    pub evaluation: Option<ModelOutput>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_name: None,
            results_dir: None,
            states: vec![RunState::Init],
            contained: Vec::new(),
            emissions_kg: None,
            co2_log: None,
            training: None,
            evaluation: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        self.states.push(state);
    }

    pub fn state(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Init)
    }

    pub fn failed(&self, stage: Stage) -> bool {
        self.contained.iter().any(|f| f.stage == stage)
    }
}

/// A run that ended in `Errored`.
#[derive(Debug, thiserror::Error)]
#[error("run aborted at {stage}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: RunError,
    pub report: RunReport,
}

/// Log a stage failure and apply its policy. Returns the error back when the
/// run must abort.
fn contain(report: &mut RunReport, stage: Stage, err: RunError) -> Option<RunError> {
    let run = run_label(report);
    match policy_for(stage) {
        FailurePolicy::Continue => {
            warn!(run, stage = %stage, error = %err, "Stage failed; continuing");
            report.contained.push(StageFailure {
                stage,
                message: err.to_string(),
            });
            None
        }
        FailurePolicy::Abort => {
            error!(run, stage = %stage, error = %err, "Stage failed; aborting run");
            Some(err)
        }
    }
}

/// Sequences one training run over its collaborators.
pub struct Orchestrator {
    results_root: PathBuf,
    model: Box<dyn DetectionModel>,
    tracker: Box<dyn ExperimentTracker>,
    tracking: TrackingStage,
    emissions: EmissionsStage,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        model: Box<dyn DetectionModel>,
        tracker: Box<dyn ExperimentTracker>,
        emissions: Box<dyn EmissionsTrackerFactory>,
    ) -> Self {
        Self {
            results_root: config.results_root(),
            model,
            tracker,
            tracking: TrackingStage::new(config.tracking.project.clone()),
            emissions: EmissionsStage::new(emissions, config.emissions.project_prefix.clone()),
        }
    }

    /// Wire the shipped adapters: the `yolo` CLI, the local run store and the
    /// RAPL/constant-power monitor.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config,
            Box::new(UltralyticsCli::new(&config.model, config.model_project_dir())),
            Box::new(LocalTracker::new(config.tracking_store())),
            Box::new(MonitorFactory::new(config.emissions.clone())),
        )
    }

    /// Run the pipeline for one (model config, dataset config) pair.
    pub async fn run(
        self,
        model_config_path: &Path,
        dataset_config_path: &Path,
    ) -> Result<RunReport, RunFailure> {
        let mut report = RunReport::new();

        let config = match RunConfig::load(model_config_path, dataset_config_path) {
            Ok(config) => config,
            Err(e) => return Err(escalate(report, Stage::ConfigLoad, e)),
        };
        report.enter(RunState::ConfigLoaded);

        let run = RunIdentity::derive(model_config_path, dataset_config_path);
        report.run_name = Some(run.clone());
        info!(run = %run, classes = ?config.dataset.class_names(), "Run configured");
        self.run_identified(config, run, report).await
    }

    async fn run_identified(
        mut self,
        config: RunConfig,
        run: RunIdentity,
        mut report: RunReport,
    ) -> Result<RunReport, RunFailure> {
        let results_dir = match run.ensure_results_dir(&self.results_root) {
            Ok(dir) => dir,
            Err(e) => return Err(escalate(report, Stage::RunDirectory, e.into())),
        };
        report.results_dir = Some(results_dir.clone());
        report.enter(RunState::DirReady);

        let mut session = match self
            .tracking
            .start(self.tracker, &run, classify(run.as_str()))
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(escalate(report, Stage::TrackingOpen, e)),
        };
        report.enter(RunState::TrackingOpen);

        let outcome = run_tracked(
            &mut *self.model,
            &self.emissions,
            &config,
            &run,
            &results_dir,
            &mut report,
        )
        .await;

        let finish_error = finish_session(&mut session, &run, &mut report).await;
        settle(report, outcome, finish_error)
    }
}

/// Final outcome once tracking is closed. A run-stage error always wins over a
/// finish error; a finish error only ends the run when its policy aborts.
fn settle(
    mut report: RunReport,
    outcome: Result<(), (Stage, RunError)>,
    finish_error: Option<RunError>,
) -> Result<RunReport, RunFailure> {
    match (outcome, finish_error) {
        (Err((stage, e)), _) => Err(abort(report, stage, e)),
        (Ok(()), Some(e)) => Err(abort(report, Stage::TrackingFinish, e)),
        (Ok(()), None) => {
            report.enter(RunState::Closed);
            info!(run = run_label(&report), "Run completed");
            Ok(report)
        }
    }
}

fn run_label(report: &RunReport) -> &str {
    report
        .run_name
        .as_ref()
        .map(RunIdentity::as_str)
        .unwrap_or("-")
}

/// Log and abort at a stage that has no containment.
fn escalate(report: RunReport, stage: Stage, err: RunError) -> RunFailure {
    error!(run = run_label(&report), stage = %stage, error = %err, "Stage failed; aborting run");
    abort(report, stage, err)
}

fn abort(mut report: RunReport, stage: Stage, error: RunError) -> RunFailure {
    report.enter(RunState::Errored);
    RunFailure {
        stage,
        error,
        report,
    }
}

/// Everything between opening and closing the tracking session.
async fn run_tracked(
    model: &mut dyn DetectionModel,
    emissions: &EmissionsStage,
    config: &RunConfig,
    run: &RunIdentity,
    results_dir: &Path,
    report: &mut RunReport,
) -> Result<(), (Stage, RunError)> {
    let active = match emissions.start(run, results_dir).await {
        Ok(active) => Some(active),
        Err(e) => {
            if let Some(e) = contain(report, Stage::EmissionsStart, e) {
                return Err((Stage::EmissionsStart, e));
            }
            None
        }
    };
    report.enter(RunState::EmissionsRunning);

    match training::train(model, config, run).await {
        Ok(output) => {
            info!(run = %run, "Training finished");
            report.training = Some(output);
        }
        Err(e) => {
            if let Some(e) = contain(report, Stage::Training, e) {
                return Err((Stage::Training, e));
            }
        }
    }
    report.enter(RunState::Trained);

    if let Err(e) = stop_emissions(active, run, results_dir, report).await
        && let Some(e) = contain(report, Stage::EmissionsStop, e)
    {
        return Err((Stage::EmissionsStop, e));
    }
    report.enter(RunState::EmissionsStopped);

    match training::evaluate(model, config, run).await {
        Ok(output) => {
            info!(run = %run, save_dir = ?output.save_dir, "Evaluation finished");
            report.evaluation = Some(output);
        }
        Err(e) => {
            if let Some(e) = contain(report, Stage::Evaluation, e) {
                return Err((Stage::Evaluation, e));
            }
        }
    }
    report.enter(RunState::Evaluated);
    Ok(())
}

/// Stop the tracker (if one started) and append its value to the CO2 log.
async fn stop_emissions(
    active: Option<ActiveEmissions>,
    run: &RunIdentity,
    results_dir: &Path,
    report: &mut RunReport,
) -> Result<(), RunError> {
    let Some(active) = active else {
        warn!(
            run = %run,
            stage = %Stage::EmissionsStop,
            "No emissions tracker running; skipping emissions capture"
        );
        return Ok(());
    };
    debug!(run = %run, project = active.project(), "Stopping emissions tracker");
    let value = active.stop().await?;
    info!(run = %run, emissions_kg = value, "CO2 emissions measured");
    report.emissions_kg = Some(value);
    let path = persist_emissions(value, results_dir)
        .map_err(|e| RunError::emissions_stop(format!("failed to save CO2 record: {e}")))?;
    report.co2_log = Some(path);
    Ok(())
}

/// Close the session. Returns the error only when the finish policy aborts.
async fn finish_session(
    session: &mut TrackingSession,
    run: &RunIdentity,
    report: &mut RunReport,
) -> Option<RunError> {
    match session.finish().await {
        Ok(()) => {
            info!(run = %run, "Tracking session finished");
            None
        }
        Err(e) => contain(report, Stage::TrackingFinish, e),
    }
}
