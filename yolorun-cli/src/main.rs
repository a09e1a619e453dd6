//! yolorun: run one object-detection training job end to end.
//!
//! Loads the model and dataset configs, trains with emissions capture, evaluates
//! on the test split and records the run with the experiment tracker.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use yolorun_core::{Orchestrator, PipelineConfig, RunError, logging};

/// Train and evaluate a detector for one model/dataset configuration pair
#[derive(Parser, Debug)]
#[command(name = "yolorun", version, about, long_about = None)]
struct Cli {
    /// Model configuration YAML (relative paths resolve against the base directory)
    #[arg(long)]
    config: PathBuf,

    /// Dataset configuration YAML (relative paths resolve against the base directory)
    #[arg(long)]
    dataset: PathBuf,

    /// Base directory for relative paths, results and the log file
    /// (overrides `base_dir` from settings and `YOLORUN_BASE_DIR`)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Pipeline settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match yolorun_core::load_config(cli.settings.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }

    let _log = match logging::init(
        &config.log_path(),
        logging::level_filter(cli.verbose, cli.quiet),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", config.log_path().display());
            return ExitCode::FAILURE;
        }
    };

    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let (model_path, dataset_path) = match resolve_inputs(&config, &cli.config, &cli.dataset) {
        Ok(paths) => paths,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        config = %model_path.display(),
        dataset = %dataset_path.display(),
        "Starting training"
    );
    match Orchestrator::from_config(&config)
        .run(&model_path, &dataset_path)
        .await
    {
        Ok(report) => {
            info!(
                config = %model_path.display(),
                emissions_kg = ?report.emissions_kg,
                contained_failures = report.contained.len(),
                "Training completed"
            );
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                config = %model_path.display(),
                stage = %failure.stage,
                "Training interrupted: {}",
                failure.error
            );
            ExitCode::FAILURE
        }
    }
}

/// Resolve both config paths against the base directory and require that they
/// exist. Runs before any stage, so a missing file leaves nothing behind.
fn resolve_inputs(
    config: &PipelineConfig,
    model: &Path,
    dataset: &Path,
) -> Result<(PathBuf, PathBuf), RunError> {
    let model = config.resolve(model);
    if !model.exists() {
        return Err(RunError::ConfigNotFound(model));
    }
    let dataset = config.resolve(dataset);
    if !dataset.exists() {
        return Err(RunError::ConfigNotFound(dataset));
    }
    Ok((model, dataset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_both_flags() {
        assert!(Cli::try_parse_from(["yolorun", "--config", "m.yaml"]).is_err());
        let cli =
            Cli::try_parse_from(["yolorun", "--config", "m.yaml", "--dataset", "d.yaml", "-vv"])
                .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.dataset, PathBuf::from("d.yaml"));
    }

    #[test]
    fn test_resolve_inputs_reports_missing_model_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            base_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let err = resolve_inputs(&config, Path::new("m.yaml"), Path::new("d.yaml")).unwrap_err();
        assert!(matches!(err, RunError::ConfigNotFound(p) if p == dir.path().join("m.yaml")));
    }

    #[test]
    fn test_resolve_inputs_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.yaml"), "nc: 1\n").unwrap();
        let dataset = dir.path().join("d.yaml");
        std::fs::write(&dataset, "names: [a]\n").unwrap();
        let config = PipelineConfig {
            base_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let (m, d) = resolve_inputs(&config, Path::new("m.yaml"), &dataset).unwrap();
        assert_eq!(m, dir.path().join("m.yaml"));
        assert_eq!(d, dataset);
    }
}
