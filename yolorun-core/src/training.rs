//! Training and evaluation stages.
//!
//! Both stages only assemble the collaborator request and call through
//! [`DetectionModel`]; whether a failure is fatal is decided by the orchestrator.

use crate::document::RunConfig;
use crate::error::{Result, RunError};
use crate::identity::RunIdentity;
use crate::model::{DetectionModel, ModelOutput, TrainRequest, ValRequest};
use tracing::{debug, info};

/// Held-out split evaluated after training.
pub const EVAL_SPLIT: &str = "test";

/// Build the training call: dataset path, run name, resume always on, and the
/// validated `training` options of the model config.
pub fn train_request(config: &RunConfig, run: &RunIdentity) -> Result<TrainRequest> {
    Ok(TrainRequest {
        model: config.model.path.clone(),
        data: config.dataset.path.clone(),
        name: run.to_string(),
        resume: true,
        options: config.model.training_options()?,
    })
}

/// Run the training stage. Option errors surface here, as training failures.
pub async fn train(
    model: &mut dyn DetectionModel,
    config: &RunConfig,
    run: &RunIdentity,
) -> Result<ModelOutput> {
    let request = train_request(config, run).map_err(|e| match e {
        RunError::InvalidOptions(_) => e,
        other => RunError::training(other.to_string()),
    })?;
    if request.options.is_empty() {
        debug!(run = %run, "No training options; using collaborator defaults");
    }
    info!(
        run = %run,
        data = %request.data.display(),
        options = request.options.to_args().len(),
        "Training started"
    );
    model.train(&request).await
}

/// Build the evaluation call on the held-out split, named `{run}_test`.
pub fn val_request(config: &RunConfig, run: &RunIdentity) -> ValRequest {
    ValRequest {
        model: config.model.path.clone(),
        data: config.dataset.path.clone(),
        split: EVAL_SPLIT.to_string(),
        save_txt: true,
        save_json: true,
        save_conf: true,
        name: format!("{run}_test"),
        verbose: true,
    }
}

pub async fn evaluate(
    model: &mut dyn DetectionModel,
    config: &RunConfig,
    run: &RunIdentity,
) -> Result<ModelOutput> {
    let request = val_request(config, run);
    info!(run = %run, split = %request.split, name = %request.name, "Evaluation started");
    model.val(&request).await.map_err(|e| match e {
        RunError::Evaluation(_) => e,
        other => RunError::evaluation(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DatasetConfig, ModelConfig};
    use crate::options::TrainingOptions;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    fn run_config(training_yaml: &str) -> RunConfig {
        RunConfig {
            model: ModelConfig {
                path: PathBuf::from("/app/configs/a.yaml"),
                raw: serde_yaml::from_str(training_yaml).unwrap(),
            },
            dataset: DatasetConfig {
                path: PathBuf::from("/app/datasets/b.yaml"),
                raw: serde_yaml::Mapping::new(),
            },
        }
    }

    fn run() -> RunIdentity {
        RunIdentity::derive(Path::new("a.yaml"), Path::new("b.yaml"))
    }

    #[test]
    fn test_train_request_passes_training_section() {
        let config = run_config("nc: 2\ntraining:\n  epochs: 5\n  close_mosaic: 0\n");
        let request = train_request(&config, &run()).unwrap();
        assert!(request.resume);
        assert_eq!(request.name, "a_b");
        assert_eq!(request.data, PathBuf::from("/app/datasets/b.yaml"));
        assert_eq!(request.options.epochs, Some(5));
        assert_eq!(request.options.to_args(), vec!["epochs=5", "close_mosaic=0"]);
    }

    #[test]
    fn test_train_request_without_training_section() {
        let config = run_config("nc: 2\n");
        let request = train_request(&config, &run()).unwrap();
        assert_eq!(request.options, TrainingOptions::default());
    }

    #[test]
    fn test_val_request_shape() {
        let config = run_config("{}");
        let request = val_request(&config, &run());
        assert_eq!(
            request,
            ValRequest {
                model: PathBuf::from("/app/configs/a.yaml"),
                data: PathBuf::from("/app/datasets/b.yaml"),
                split: "test".to_string(),
                save_txt: true,
                save_json: true,
                save_conf: true,
                name: "a_b_test".to_string(),
                verbose: true,
            }
        );
    }
}
