//! Error types for the yolorun-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a training run.
///
/// Each variant maps to one stage boundary of the pipeline; the orchestrator
/// decides from [`crate::stage::policy_for`] whether a variant aborts the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Failed to parse configuration {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("Invalid training options: {0}")]
    InvalidOptions(String),

    #[error("Emissions tracker failed to start: {0}")]
    TrackerInit(String),

    #[error("Tracking session failed to open: {0}")]
    TrackingOpen(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Emissions tracker failed to stop: {0}")]
    EmissionsStop(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Tracking session failed to finish: {0}")]
    TrackingFinish(String),

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunError {
    pub fn config_parse(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: msg.to_string(),
        }
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    pub fn tracker_init(msg: impl Into<String>) -> Self {
        Self::TrackerInit(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn emissions_stop(msg: impl Into<String>) -> Self {
        Self::EmissionsStop(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
