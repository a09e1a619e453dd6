//! # yolorun-core
//!
//! Orchestration of object-detection training runs: configuration loading, run
//! naming, experiment tracking, emissions capture around training, held-out
//! evaluation, and the per-stage failure policy that ties them together.
//!
//! The model library, the energy tracker and the tracking service are reached
//! through traits ([`DetectionModel`], [`EmissionsTracker`],
//! [`ExperimentTracker`]) so each can be swapped or faked.

pub mod config;
pub mod dataset;
pub mod document;
pub mod emissions;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod options;
pub mod orchestrator;
pub mod stage;
pub mod tracking;
pub mod training;

// Re-exports
pub use config::{PipelineConfig, load_config};
pub use document::{DatasetConfig, ModelConfig, RunConfig, load_document};
pub use emissions::{EmissionsStage, EmissionsTracker, EmissionsTrackerFactory, persist_emissions};
pub use error::{Result, RunError};
pub use identity::RunIdentity;
pub use model::{DetectionModel, ModelOutput, TrainRequest, UltralyticsCli, ValRequest};
pub use options::TrainingOptions;
pub use orchestrator::{Orchestrator, RunFailure, RunReport, RunState};
pub use stage::{FailurePolicy, Stage};
pub use tracking::{Classification, ExperimentTracker, TrackingSession, TrackingStage, classify};
