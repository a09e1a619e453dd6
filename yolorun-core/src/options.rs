//! Training options passed through to the model collaborator.
//!
//! The well-known keys are typed and validated; anything else lands in
//! [`TrainingOptions::extra`] and is forwarded untouched, because the set of
//! recognised options belongs to the collaborator, not to this crate.

use crate::error::{Result, RunError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Batch size: a fixed count, `-1` for automatic sizing, or a fraction of
/// device memory in `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchSize {
    Fixed(i64),
    Fraction(f64),
}

impl std::fmt::Display for BatchSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchSize::Fixed(n) => write!(f, "{n}"),
            BatchSize::Fraction(x) => write!(f, "{x}"),
        }
    }
}

/// Typed view of a model config's `training` sub-mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgsz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patience: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr0: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Collaborator-specific keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Keys the pipeline sets itself; a `training` section must not override them.
/// Adapter defaults such as `project` or `exist_ok` may be overridden.
const RESERVED_KEYS: &[&str] = &["data", "name", "resume"];

impl TrainingOptions {
    /// Build and validate options from the raw `training` mapping.
    pub fn from_mapping(mapping: Mapping) -> Result<Self> {
        if let Some(key) = mapping
            .keys()
            .filter_map(Value::as_str)
            .find(|k| RESERVED_KEYS.contains(k))
        {
            return Err(RunError::invalid_options(format!(
                "`{key}` is set by the pipeline and cannot appear under `training`"
            )));
        }
        let options: TrainingOptions = serde_yaml::from_value(Value::Mapping(mapping))
            .map_err(|e| RunError::invalid_options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == Some(0) {
            return Err(RunError::invalid_options("epochs must be at least 1"));
        }
        if self.imgsz == Some(0) {
            return Err(RunError::invalid_options("imgsz must be at least 1"));
        }
        match self.batch {
            Some(BatchSize::Fixed(n)) if n == 0 || n < -1 => {
                return Err(RunError::invalid_options(format!(
                    "batch must be positive or -1 for auto, got {n}"
                )));
            }
            Some(BatchSize::Fraction(x)) if !(x > 0.0 && x < 1.0) => {
                return Err(RunError::invalid_options(format!(
                    "fractional batch must be in (0, 1), got {x}"
                )));
            }
            _ => {}
        }
        if let Some(lr) = self.lr0
            && !(lr > 0.0 && lr.is_finite())
        {
            return Err(RunError::invalid_options(format!(
                "lr0 must be a positive number, got {lr}"
            )));
        }
        Ok(())
    }

    /// Render every set option as `key=value`, typed fields first, then `extra`
    /// in key order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |key: &str, value: String| args.push(format!("{key}={value}"));
        if let Some(v) = self.epochs {
            push("epochs", v.to_string());
        }
        if let Some(v) = self.batch {
            push("batch", v.to_string());
        }
        if let Some(v) = self.imgsz {
            push("imgsz", v.to_string());
        }
        if let Some(v) = &self.device {
            push("device", render_value(v));
        }
        if let Some(v) = self.workers {
            push("workers", v.to_string());
        }
        if let Some(v) = self.patience {
            push("patience", v.to_string());
        }
        if let Some(v) = &self.optimizer {
            push("optimizer", v.clone());
        }
        if let Some(v) = self.lr0 {
            push("lr0", v.to_string());
        }
        if let Some(v) = self.seed {
            push("seed", v.to_string());
        }
        for (key, value) in &self.extra {
            push(key, render_value(value));
        }
        args
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Render a YAML value the way the Ultralytics CLI parses `key=value` pairs.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(seq) => {
            let items: Vec<String> = seq.iter().map(render_value).collect();
            format!("[{}]", items.join(","))
        }
        Value::Mapping(_) | Value::Tagged(_) => serde_json::to_string(value)
            .unwrap_or_else(|_| String::from("{}")),
    }
}
