//! Run naming and the per-run output directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of a run, derived from its two configuration files.
///
/// The same name is used as the output directory, the tracker run name and the
/// `run` field on the run's log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunIdentity(String);

impl RunIdentity {
    /// `{model_config_stem}_{dataset_config_stem}`. Pure; no filesystem access.
    pub fn derive(model_config_path: &Path, dataset_config_path: &Path) -> Self {
        Self(format!(
            "{}_{}",
            file_stem(model_config_path),
            file_stem(dataset_config_path)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<results_root>/<name>`.
    pub fn results_dir(&self, results_root: &Path) -> PathBuf {
        results_root.join(&self.0)
    }

    /// Create the run output directory. Succeeds if it already exists.
    pub fn ensure_results_dir(&self, results_root: &Path) -> std::io::Result<PathBuf> {
        let dir = self.results_dir(results_root);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl std::fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_joins_stems() {
        let id = RunIdentity::derive(Path::new("a.yaml"), Path::new("b.yaml"));
        assert_eq!(id.as_str(), "a_b");
    }

    #[test]
    fn test_derive_ignores_directory_and_extension() {
        let a = RunIdentity::derive(
            Path::new("/app/configs/YOLOv10n.yaml"),
            Path::new("/app/datasets/D3_NoSentinel1.yaml"),
        );
        let b = RunIdentity::derive(
            Path::new("other/YOLOv10n.yml"),
            Path::new("D3_NoSentinel1.json"),
        );
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "YOLOv10n_D3_NoSentinel1");
    }

    #[test]
    fn test_only_last_extension_is_stripped() {
        let id = RunIdentity::derive(Path::new("m.v2.yaml"), Path::new("d.yaml"));
        assert_eq!(id.as_str(), "m.v2_d");
    }

    #[test]
    fn test_ensure_results_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let id = RunIdentity::derive(Path::new("a.yaml"), Path::new("b.yaml"));
        let first = id.ensure_results_dir(root.path()).unwrap();
        std::fs::write(first.join("keep.txt"), "x").unwrap();
        let second = id.ensure_results_dir(root.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, root.path().join("a_b"));
        assert!(second.join("keep.txt").exists());
    }
}
