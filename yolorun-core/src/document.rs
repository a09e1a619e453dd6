//! Model and dataset configuration documents.
//!
//! Both documents are YAML mappings owned by the model collaborator; this module
//! only parses them and exposes the few keys the pipeline itself reads.

use crate::error::{Result, RunError};
use crate::options::TrainingOptions;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Parse a YAML document into a mapping.
///
/// Re-reads the file on every call.
pub fn load_document(path: &Path) -> Result<Mapping> {
    let content =
        std::fs::read_to_string(path).map_err(|e| RunError::config_parse(path, e))?;
    // An empty document is a valid, empty configuration.
    let value: Value = if content.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(&content).map_err(|e| RunError::config_parse(path, e))?
    };
    let mapping = match value {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        other => {
            return Err(RunError::config_parse(
                path,
                format!("expected a mapping at the top level, found {}", kind(&other)),
            ));
        }
    };
    info!(path = %path.display(), "Configuration loaded");
    Ok(mapping)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Architecture and hyperparameters of the detector.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub raw: Mapping,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            raw: load_document(path)?,
        })
    }

    /// The nested `training` sub-mapping, empty when absent.
    pub fn training_section(&self) -> Result<Mapping> {
        match self.raw.get("training") {
            None | Some(Value::Null) => Ok(Mapping::new()),
            Some(Value::Mapping(m)) => Ok(m.clone()),
            Some(other) => Err(RunError::invalid_options(format!(
                "`training` in {} must be a mapping, found {}",
                self.path.display(),
                kind(other)
            ))),
        }
    }

    /// Typed view of the `training` sub-mapping.
    pub fn training_options(&self) -> Result<TrainingOptions> {
        TrainingOptions::from_mapping(self.training_section()?)
    }
}

/// Paths and class definitions of the detection dataset.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub path: PathBuf,
    pub raw: Mapping,
}

impl DatasetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            raw: load_document(path)?,
        })
    }

    /// Class names, from either a `names` sequence or an index-keyed mapping.
    pub fn class_names(&self) -> Vec<String> {
        match self.raw.get("names") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(scalar_string).collect(),
            Some(Value::Mapping(map)) => {
                let mut entries: Vec<(i64, String)> = map
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_i64()?, scalar_string(v)?)))
                    .collect();
                entries.sort_by_key(|(idx, _)| *idx);
                entries.into_iter().map(|(_, name)| name).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The pair of documents one run is built from.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
}

impl RunConfig {
    pub fn load(model_path: &Path, dataset_path: &Path) -> Result<Self> {
        Ok(Self {
            model: ModelConfig::load(model_path)?,
            dataset: DatasetConfig::load(dataset_path)?,
        })
    }
}
