//! Pipeline stages and their failure policy.

use serde::{Deserialize, Serialize};

/// One stage boundary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ConfigLoad,
    RunDirectory,
    TrackingOpen,
    EmissionsStart,
    Training,
    EmissionsStop,
    Evaluation,
    TrackingFinish,
}

impl Stage {
    /// Marker attached to every log line about this stage.
    pub fn marker(self) -> &'static str {
        match self {
            Stage::ConfigLoad => "config_load",
            Stage::RunDirectory => "run_directory",
            Stage::TrackingOpen => "tracking_open",
            Stage::EmissionsStart => "emissions_start",
            Stage::Training => "training",
            Stage::EmissionsStop => "emissions_stop",
            Stage::Evaluation => "evaluation",
            Stage::TrackingFinish => "tracking_finish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.marker())
    }
}

/// What the orchestrator does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, record, and go on with the next stage.
    Continue,
    /// Log and end the run with this error.
    Abort,
}

/// Failure policy per stage.
pub const FAILURE_POLICY: &[(Stage, FailurePolicy)] = &[
    (Stage::ConfigLoad, FailurePolicy::Abort),
    (Stage::RunDirectory, FailurePolicy::Abort),
    (Stage::TrackingOpen, FailurePolicy::Abort),
    (Stage::EmissionsStart, FailurePolicy::Continue),
    (Stage::Training, FailurePolicy::Continue),
    (Stage::EmissionsStop, FailurePolicy::Abort),
    (Stage::Evaluation, FailurePolicy::Abort),
    (Stage::TrackingFinish, FailurePolicy::Continue),
];

pub fn policy_for(stage: Stage) -> FailurePolicy {
    FAILURE_POLICY
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, p)| *p)
        .unwrap_or(FailurePolicy::Abort)
}
