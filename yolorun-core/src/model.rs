//! The object-detection model collaborator.
//!
//! [`DetectionModel`] is the seam the training and evaluation stages call
//! through. [`UltralyticsCli`] implements it by driving the Ultralytics `yolo`
//! command-line tool as a subprocess, following the managed-subprocess pattern
//! of the rest of the crate: piped output, `kill_on_drop`, stderr surfaced in
//! the error.

use crate::config::ModelBackendConfig;
use crate::error::{Result, RunError};
use crate::options::TrainingOptions;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Arguments of one training call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainRequest {
    /// Architecture document the model is built from.
    pub model: PathBuf,
    /// Dataset document.
    pub data: PathBuf,
    pub name: String,
    /// Continue from the last checkpoint of `name` when one exists.
    pub resume: bool,
    pub options: TrainingOptions,
}

/// Arguments of one evaluation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValRequest {
    /// Architecture document, evaluated as-is when training left no weights.
    pub model: PathBuf,
    pub data: PathBuf,
    pub split: String,
    pub save_txt: bool,
    pub save_json: bool,
    pub save_conf: bool,
    pub name: String,
    pub verbose: bool,
}

/// Where a collaborator call left its artifacts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub save_dir: Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

/// A trainable detector. The value is stateful: `val` evaluates whatever state
/// the last `train` call left behind, including a failed one.
#[async_trait]
pub trait DetectionModel: Send {
    async fn train(&mut self, request: &TrainRequest) -> Result<ModelOutput>;

    async fn val(&mut self, request: &ValRequest) -> Result<ModelOutput>;
}

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL: usize = 20;

/// Drives `yolo <task> train|val key=value...`.
pub struct UltralyticsCli {
    executable: PathBuf,
    task: String,
    project_dir: PathBuf,
    last_train_name: Option<String>,
}

impl UltralyticsCli {
    pub fn new(config: &ModelBackendConfig, project_dir: PathBuf) -> Self {
        Self {
            executable: config.executable.clone(),
            task: config.task.clone(),
            project_dir,
            last_train_name: None,
        }
    }

    fn weights_dir(&self, name: &str) -> PathBuf {
        self.project_dir.join(name).join("weights")
    }

    /// Best weights of the most recent training run, then last, if any exist.
    fn trained_weights(&self, name: &str) -> Option<PathBuf> {
        let dir = self.weights_dir(name);
        ["best.pt", "last.pt"]
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.exists())
    }

    /// `model`, `project` and `exist_ok` are defaults; a training option with the
    /// same key replaces them.
    pub fn train_args(&self, request: &TrainRequest) -> Vec<String> {
        let options = request.options.to_args();
        let overridden = |key: &str| {
            options
                .iter()
                .any(|arg| arg.split_once('=').is_some_and(|(k, _)| k == key))
        };
        let mut args = vec![self.task.clone(), "train".to_string()];
        if !overridden("model") {
            args.push(format!("model={}", request.model.display()));
        }
        args.push(format!("data={}", request.data.display()));
        if !overridden("project") {
            args.push(format!("project={}", self.project_dir.display()));
        }
        args.push(format!("name={}", request.name));
        if !overridden("exist_ok") {
            args.push("exist_ok=True".to_string());
        }
        if request.resume {
            let last = self.weights_dir(&request.name).join("last.pt");
            if last.exists() {
                args.push(format!("resume={}", last.display()));
            } else {
                debug!(name = %request.name, "No checkpoint to resume from; starting fresh");
            }
        }
        args.extend(options);
        args
    }

    pub fn val_args(&self, model: &Path, request: &ValRequest) -> Vec<String> {
        vec![
            self.task.clone(),
            "val".to_string(),
            format!("model={}", model.display()),
            format!("data={}", request.data.display()),
            format!("split={}", request.split),
            format!("save_txt={}", py_bool(request.save_txt)),
            format!("save_json={}", py_bool(request.save_json)),
            format!("save_conf={}", py_bool(request.save_conf)),
            format!("project={}", self.project_dir.display()),
            format!("name={}", request.name),
            "exist_ok=True".to_string(),
            format!("verbose={}", py_bool(request.verbose)),
        ]
    }

    async fn run(&self, args: &[String]) -> std::result::Result<(), String> {
        debug!(executable = %self.executable.display(), ?args, "Spawning model process");
        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.executable.display()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, tail, status) = tokio::join!(
            forward_lines(stdout, false),
            forward_lines(stderr, true),
            child.wait()
        );
        let status = status.map_err(|e| format!("failed to wait for model process: {e}"))?;
        if status.success() {
            Ok(())
        } else {
            let tail: Vec<String> = tail.into_iter().collect();
            Err(format!("{status}: {}", tail.join("\n")))
        }
    }
}

/// Forward a child's output to the log line by line until EOF. Returns the last
/// `STDERR_TAIL` lines when `keep_tail` is set.
///
/// The pipe is drained to the end even through undecodable bytes; closing it
/// early would kill the child with SIGPIPE on its next write.
async fn forward_lines<R>(stream: Option<R>, keep_tail: bool) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::new();
    let Some(stream) = stream else {
        return tail;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Model output stream closed");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        info!(target: "yolorun::model", "{line}");
        if keep_tail {
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    tail
}

fn py_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

#[async_trait]
impl DetectionModel for UltralyticsCli {
    async fn train(&mut self, request: &TrainRequest) -> Result<ModelOutput> {
        self.last_train_name = Some(request.name.clone());
        let args = self.train_args(request);
        self.run(&args).await.map_err(RunError::training)?;
        Ok(ModelOutput {
            save_dir: Some(self.project_dir.join(&request.name)),
            weights: self.trained_weights(&request.name),
        })
    }

    async fn val(&mut self, request: &ValRequest) -> Result<ModelOutput> {
        // Evaluate whatever training produced; fall back to the bare architecture.
        let model = self
            .last_train_name
            .as_deref()
            .and_then(|name| self.trained_weights(name))
            .unwrap_or_else(|| request.model.clone());
        let args = self.val_args(&model, request);
        self.run(&args).await.map_err(RunError::evaluation)?;
        Ok(ModelOutput {
            save_dir: Some(self.project_dir.join(&request.name)),
            weights: Some(model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backend(project: &Path) -> UltralyticsCli {
        UltralyticsCli::new(&ModelBackendConfig::default(), project.to_path_buf())
    }

    fn train_request(options: TrainingOptions) -> TrainRequest {
        TrainRequest {
            model: PathBuf::from("/app/configs/a.yaml"),
            data: PathBuf::from("/app/datasets/b.yaml"),
            name: "a_b".to_string(),
            resume: true,
            options,
        }
    }

    #[test]
    fn test_train_args_without_checkpoint() {
        let project = tempfile::tempdir().unwrap();
        let cli = backend(project.path());
        let mut options = TrainingOptions::default();
        options.epochs = Some(3);
        let args = cli.train_args(&train_request(options));
        assert_eq!(
            args,
            vec![
                "detect".to_string(),
                "train".to_string(),
                "model=/app/configs/a.yaml".to_string(),
                "data=/app/datasets/b.yaml".to_string(),
                format!("project={}", project.path().display()),
                "name=a_b".to_string(),
                "exist_ok=True".to_string(),
                "epochs=3".to_string(),
            ]
        );
    }

    #[test]
    fn test_train_args_resume_from_last_checkpoint() {
        let project = tempfile::tempdir().unwrap();
        let weights = project.path().join("a_b").join("weights");
        std::fs::create_dir_all(&weights).unwrap();
        std::fs::write(weights.join("last.pt"), b"ckpt").unwrap();

        let cli = backend(project.path());
        let args = cli.train_args(&train_request(TrainingOptions::default()));
        assert!(args.contains(&format!("resume={}", weights.join("last.pt").display())));
    }

    #[test]
    fn test_training_options_replace_adapter_defaults() {
        let project = tempfile::tempdir().unwrap();
        let cli = backend(project.path());
        let options = TrainingOptions::from_mapping(
            serde_yaml::from_str("project: /runs/custom\nexist_ok: false\n").unwrap(),
        )
        .unwrap();
        let args = cli.train_args(&train_request(options));
        assert_eq!(
            args,
            vec![
                "detect".to_string(),
                "train".to_string(),
                "model=/app/configs/a.yaml".to_string(),
                "data=/app/datasets/b.yaml".to_string(),
                "name=a_b".to_string(),
                "exist_ok=False".to_string(),
                "project=/runs/custom".to_string(),
            ]
        );
    }

    fn val_request(name: &str) -> ValRequest {
        ValRequest {
            model: PathBuf::from("/app/configs/a.yaml"),
            data: PathBuf::from("d.yaml"),
            split: "test".to_string(),
            save_txt: true,
            save_json: true,
            save_conf: true,
            name: name.to_string(),
            verbose: true,
        }
    }

    #[test]
    fn test_val_args() {
        let project = tempfile::tempdir().unwrap();
        let cli = backend(project.path());
        let args = cli.val_args(Path::new("best.pt"), &val_request("a_b_test"));
        assert!(args.contains(&"split=test".to_string()));
        assert!(args.contains(&"save_json=True".to_string()));
        assert!(args.contains(&"name=a_b_test".to_string()));
        assert_eq!(&args[..2], &["detect".to_string(), "val".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_val_before_train_evaluates_architecture() {
        let project = tempfile::tempdir().unwrap();
        let config = ModelBackendConfig {
            executable: PathBuf::from("/bin/true"),
            ..ModelBackendConfig::default()
        };
        let mut cli = UltralyticsCli::new(&config, project.path().to_path_buf());
        let output = cli.val(&val_request("a_b_test")).await.unwrap();
        assert_eq!(output.weights, Some(PathBuf::from("/app/configs/a.yaml")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_undecodable_output_does_not_close_pipe() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yolo");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             printf '\\377\\376\\n' >&2\n\
             i=0\n\
             while [ $i -lt 20000 ]; do echo \"progress $i\" >&2; i=$((i+1)); done\n\
             exit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ModelBackendConfig {
            executable: script,
            ..ModelBackendConfig::default()
        };
        let mut cli = UltralyticsCli::new(&config, dir.path().join("runs"));
        cli.train(&train_request(TrainingOptions::default()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_executable_is_training_error() {
        let project = tempfile::tempdir().unwrap();
        let config = ModelBackendConfig {
            executable: PathBuf::from("/nonexistent/yolo-binary"),
            ..ModelBackendConfig::default()
        };
        let mut cli = UltralyticsCli::new(&config, project.path().to_path_buf());
        let err = cli
            .train(&train_request(TrainingOptions::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
