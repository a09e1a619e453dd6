//! Pipeline settings for yolorun.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit settings file -> environment. CLI flags are applied by the caller on
//! the extracted value. Model and dataset documents are *not* settings; they are
//! loaded per run by [`crate::document`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory that relative config paths and relative settings resolve against.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Root under which every run gets its own output directory.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Process-wide log file, mirrored to stdout.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub emissions: EmissionsConfig,
    #[serde(default)]
    pub model: ModelBackendConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            results_dir: default_results_dir(),
            log_file: default_log_file(),
            tracking: TrackingConfig::default(),
            emissions: EmissionsConfig::default(),
            model: ModelBackendConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Resolve `path` against `base_dir` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn results_root(&self) -> PathBuf {
        self.resolve(&self.results_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_file)
    }

    pub fn tracking_store(&self) -> PathBuf {
        self.resolve(&self.tracking.store_dir)
    }

    /// Directory the model collaborator writes its runs under.
    pub fn model_project_dir(&self) -> PathBuf {
        match &self.model.project_dir {
            Some(dir) => self.resolve(dir),
            None => self.results_root(),
        }
    }

    /// Check for settings that would make every run fail.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.tracking.project.trim().is_empty() {
            warnings.push("tracking.project is empty".to_string());
        }
        if self.emissions.carbon_intensity_kg_per_kwh < 0.0 {
            warnings.push(format!(
                "emissions.carbon_intensity_kg_per_kwh ({}) must not be negative",
                self.emissions.carbon_intensity_kg_per_kwh
            ));
        }
        if let Some(watts) = self.emissions.fallback_power_watts
            && watts <= 0.0
        {
            warnings.push(format!(
                "emissions.fallback_power_watts ({watts}) must be positive"
            ));
        }
        if self.model.executable.as_os_str().is_empty() {
            warnings.push("model.executable is empty".to_string());
        }
        warnings
    }
}

/// Experiment-tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Project namespace every run is filed under.
    #[serde(default = "default_tracking_project")]
    pub project: String,
    /// Where the local tracker keeps its run records.
    #[serde(default = "default_tracking_store")]
    pub store_dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            project: default_tracking_project(),
            store_dir: default_tracking_store(),
        }
    }
}

/// Energy measurement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionsConfig {
    /// Disable to skip emissions capture entirely (runs as if the tracker failed to start).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefix of the tracker's project label; the run name is appended.
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
    /// Grid carbon intensity used to convert energy to CO2-equivalent.
    #[serde(default = "default_carbon_intensity")]
    pub carbon_intensity_kg_per_kwh: f64,
    /// Root of the Linux powercap tree holding RAPL energy counters.
    #[serde(default = "default_rapl_root")]
    pub rapl_root: PathBuf,
    /// Constant draw to assume when no energy counter is readable.
    #[serde(default)]
    pub fallback_power_watts: Option<f64>,
}

impl Default for EmissionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_prefix: default_project_prefix(),
            carbon_intensity_kg_per_kwh: default_carbon_intensity(),
            rapl_root: default_rapl_root(),
            fallback_power_watts: None,
        }
    }
}

/// Model collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBackendConfig {
    /// The Ultralytics command-line executable.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Ultralytics task name.
    #[serde(default = "default_task")]
    pub task: String,
    /// Where training/evaluation artifacts go (defaults to the results root).
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
}

impl Default for ModelBackendConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            task: default_task(),
            project_dir: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/app")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("training.log")
}

fn default_tracking_project() -> String {
    "results".to_string()
}

fn default_tracking_store() -> PathBuf {
    PathBuf::from("tracking")
}

fn default_project_prefix() -> String {
    "YOLOv10".to_string()
}

fn default_carbon_intensity() -> f64 {
    0.475
}

fn default_rapl_root() -> PathBuf {
    PathBuf::from("/sys/class/powercap")
}

fn default_executable() -> PathBuf {
    PathBuf::from("yolo")
}

fn default_task() -> String {
    "detect".to_string()
}

fn default_true() -> bool {
    true
}

/// Load pipeline settings.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `YOLORUN_`, `__` for nesting)
/// 2. Explicit settings file (`--settings`)
/// 3. User config (`~/.config/yolorun/config.toml`)
/// 4. Built-in defaults
pub fn load_config(settings_file: Option<&Path>) -> Result<PipelineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "yolorun", "yolorun") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = settings_file {
        // Toml::file silently skips missing files; a named settings file must exist.
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "settings file not found: {}",
                path.display()
            ))));
        }
        figment = figment.merge(Toml::file(path));
    }

    // YOLORUN_BASE_DIR, YOLORUN_EMISSIONS__FALLBACK_POWER_WATTS, etc.
    figment = figment.merge(Env::prefixed("YOLORUN_").split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("/app"));
        assert_eq!(config.results_root(), PathBuf::from("/app/results"));
        assert_eq!(config.log_path(), PathBuf::from("/app/training.log"));
        assert_eq!(config.tracking.project, "results");
        assert_eq!(config.emissions.project_prefix, "YOLOv10");
        assert!(config.emissions.enabled);
        assert_eq!(config.model.task, "detect");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.resolve(Path::new("/data/d.yaml")),
            PathBuf::from("/data/d.yaml")
        );
        assert_eq!(
            config.resolve(Path::new("configs/m.yaml")),
            PathBuf::from("/app/configs/m.yaml")
        );
    }

    #[test]
    fn test_model_project_dir_defaults_to_results_root() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.model_project_dir(), config.results_root());
        config.model.project_dir = Some(PathBuf::from("runs/detect"));
        assert_eq!(
            config.model_project_dir(),
            PathBuf::from("/app/runs/detect")
        );
    }

    #[test]
    fn test_load_config_from_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolorun.toml");
        std::fs::write(
            &path,
            r#"
base_dir = "/srv/yolo"

[tracking]
project = "nightly"

[emissions]
carbon_intensity_kg_per_kwh = 0.2
fallback_power_watts = 150.0
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/srv/yolo"));
        assert_eq!(config.tracking.project, "nightly");
        assert_eq!(config.emissions.carbon_intensity_kg_per_kwh, 0.2);
        assert_eq!(config.emissions.fallback_power_watts, Some(150.0));
        // untouched sections keep their defaults
        assert_eq!(config.model.executable, PathBuf::from("yolo"));
    }

    #[test]
    fn test_load_config_missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_written_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolorun.toml");
        let mut written = PipelineConfig::default();
        written.results_dir = PathBuf::from("runs");
        written.model.task = "segment".to_string();
        std::fs::write(&path, toml::to_string_pretty(&written).unwrap()).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.results_dir, PathBuf::from("runs"));
        assert_eq!(config.model.task, "segment");
        assert_eq!(config.emissions.fallback_power_watts, None);
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut config = PipelineConfig::default();
        config.tracking.project = "  ".to_string();
        config.emissions.fallback_power_watts = Some(0.0);
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
    }
}
