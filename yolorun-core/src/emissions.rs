//! Energy and CO2 capture around the training stage.
//!
//! Measurement is best-effort on the way in (a tracker that cannot start leaves
//! the run without emissions capture) and strict on the way out (a started
//! tracker that cannot report is a run error). The orchestrator applies that
//! policy; this module only reports what happened.

use crate::config::EmissionsConfig;
use crate::error::{Result, RunError};
use crate::identity::RunIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Run-scoped, append-only CO2 log.
pub const CO2_LOG_FILE: &str = "co2_production.txt";

/// Raw measurement artifact written by [`EmissionsMonitor`].
pub const MEASUREMENTS_FILE: &str = "emissions.csv";

const MICROJOULES_PER_KWH: f64 = 3.6e12;
const JOULES_PER_KWH: f64 = 3.6e6;

/// An energy tracker measuring the current process.
#[async_trait]
pub trait EmissionsTracker: Send {
    async fn start(&mut self) -> Result<()>;

    /// End measurement and return kilograms of CO2-equivalent.
    async fn stop(&mut self) -> Result<f64>;
}

/// Builds a tracker for one run.
pub trait EmissionsTrackerFactory: Send + Sync {
    fn create(&self, project_name: &str, output_dir: &Path)
    -> Result<Box<dyn EmissionsTracker>>;
}

/// Wraps an energy tracker's lifetime around training.
pub struct EmissionsStage {
    factory: Box<dyn EmissionsTrackerFactory>,
    project_prefix: String,
}

impl EmissionsStage {
    pub fn new(factory: Box<dyn EmissionsTrackerFactory>, project_prefix: impl Into<String>) -> Self {
        Self {
            factory,
            project_prefix: project_prefix.into(),
        }
    }

    /// Project label handed to the tracker, e.g. `YOLOv10_a_b`.
    pub fn project_label(&self, run: &RunIdentity) -> String {
        format!("{}_{}", self.project_prefix, run)
    }

    /// Construct and start the tracker. Any failure is reported as `TrackerInit`.
    pub async fn start(&self, run: &RunIdentity, output_dir: &Path) -> Result<ActiveEmissions> {
        let project = self.project_label(run);
        let mut tracker = self
            .factory
            .create(&project, output_dir)
            .map_err(into_tracker_init)?;
        tracker.start().await.map_err(into_tracker_init)?;
        info!(project = %project, "Emissions tracker started");
        Ok(ActiveEmissions { tracker, project })
    }
}

fn into_tracker_init(e: RunError) -> RunError {
    match e {
        RunError::TrackerInit(_) => e,
        other => RunError::tracker_init(other.to_string()),
    }
}

/// A started tracker. Stopping consumes it, so a tracker is stopped at most once.
pub struct ActiveEmissions {
    tracker: Box<dyn EmissionsTracker>,
    project: String,
}

impl ActiveEmissions {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub async fn stop(mut self) -> Result<f64> {
        let value = self.tracker.stop().await.map_err(|e| match e {
            RunError::EmissionsStop(_) => e,
            other => RunError::emissions_stop(other.to_string()),
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(RunError::emissions_stop(format!(
                "tracker reported an invalid emissions value: {value}"
            )));
        }
        Ok(value)
    }
}

/// One line of the CO2 log: `<YYYY-mm-dd HH:MM:SS> - CO2: <value> kg`.
pub fn format_record(timestamp: DateTime<Local>, value: f64) -> String {
    format!(
        "{} - CO2: {} kg",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        value
    )
}

/// Append one record to `<output_dir>/co2_production.txt`, creating it if needed.
pub fn persist_emissions(value: f64, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(CO2_LOG_FILE);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{}", format_record(Local::now(), value))?;
    info!(path = %path.display(), "CO2 record saved");
    Ok(path)
}

/// Where energy readings come from.
#[derive(Debug, Clone)]
enum EnergySource {
    /// Package-level RAPL counters.
    Rapl(Vec<RaplDomain>),
    /// No counters; assume a constant draw.
    ConstantPower { watts: f64 },
}

#[derive(Debug, Clone)]
struct RaplDomain {
    name: String,
    energy_path: PathBuf,
    max_range_uj: u64,
}

impl RaplDomain {
    fn read_uj(&self) -> Result<u64> {
        read_u64(&self.energy_path)
    }
}

fn read_u64(path: &Path) -> Result<u64> {
    let raw = std::fs::read_to_string(path)?;
    raw.trim().parse::<u64>().map_err(|e| {
        RunError::tracker_init(format!("unreadable counter {}: {e}", path.display()))
    })
}

/// Find the top-level `intel-rapl:N` domains. Subdomains (`intel-rapl:N:M`) are
/// already included in their package's counter and are skipped.
fn discover_rapl(root: &Path) -> Vec<RaplDomain> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut domains: Vec<RaplDomain> = entries
        .flatten()
        .filter_map(|entry| {
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let suffix = dir_name.strip_prefix("intel-rapl:")?;
            if suffix.contains(':') {
                return None;
            }
            let dir = entry.path();
            let energy_path = dir.join("energy_uj");
            // Counters are often root-only; an unreadable one is not usable.
            read_u64(&energy_path).ok()?;
            let max_range_uj = read_u64(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
            let name = std::fs::read_to_string(dir.join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or(dir_name);
            Some(RaplDomain {
                name,
                energy_path,
                max_range_uj,
            })
        })
        .collect();
    domains.sort_by(|a, b| a.energy_path.cmp(&b.energy_path));
    domains
}

/// Energy consumed between two readings of a wrapping counter.
fn counter_delta(start: u64, end: u64, max_range: u64) -> u64 {
    if end >= start {
        end - start
    } else {
        max_range.saturating_sub(start).saturating_add(end)
    }
}

struct Started {
    at: Instant,
    wall: DateTime<Utc>,
    readings: Vec<u64>,
}

/// Process energy tracker backed by RAPL counters or a constant-power estimate.
pub struct EmissionsMonitor {
    project: String,
    output_dir: PathBuf,
    source: EnergySource,
    carbon_intensity: f64,
    started: Option<Started>,
}

impl EmissionsMonitor {
    pub fn new(project: &str, output_dir: &Path, config: &EmissionsConfig) -> Result<Self> {
        let domains = discover_rapl(&config.rapl_root);
        let source = if !domains.is_empty() {
            debug!(
                domains = ?domains.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                "Using RAPL energy counters"
            );
            EnergySource::Rapl(domains)
        } else if let Some(watts) = config.fallback_power_watts {
            debug!(watts, "No RAPL counters readable; using constant power estimate");
            EnergySource::ConstantPower { watts }
        } else {
            return Err(RunError::tracker_init(format!(
                "no readable RAPL energy counters under {} and no fallback_power_watts set",
                config.rapl_root.display()
            )));
        };
        Ok(Self {
            project: project.to_string(),
            output_dir: output_dir.to_path_buf(),
            source,
            carbon_intensity: config.carbon_intensity_kg_per_kwh,
            started: None,
        })
    }

    fn read_all(&self) -> Result<Vec<u64>> {
        match &self.source {
            EnergySource::Rapl(domains) => domains.iter().map(RaplDomain::read_uj).collect(),
            EnergySource::ConstantPower { .. } => Ok(Vec::new()),
        }
    }

    fn energy_kwh(&self, started: &Started, readings: &[u64], elapsed_secs: f64) -> f64 {
        match &self.source {
            EnergySource::Rapl(domains) => {
                let total_uj: u64 = domains
                    .iter()
                    .zip(started.readings.iter().zip(readings))
                    .map(|(d, (s, e))| counter_delta(*s, *e, d.max_range_uj))
                    .sum();
                total_uj as f64 / MICROJOULES_PER_KWH
            }
            EnergySource::ConstantPower { watts } => watts * elapsed_secs / JOULES_PER_KWH,
        }
    }

    fn append_measurement(&self, wall: DateTime<Utc>, duration: f64, kwh: f64, kg: f64) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(MEASUREMENTS_FILE);
        let is_new = !path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if is_new {
            writeln!(file, "timestamp,project_name,duration_s,energy_kwh,emissions_kg")?;
        }
        writeln!(
            file,
            "{},{},{:.3},{},{}",
            wall.to_rfc3339(),
            self.project,
            duration,
            kwh,
            kg
        )?;
        Ok(())
    }
}

#[async_trait]
impl EmissionsTracker for EmissionsMonitor {
    async fn start(&mut self) -> Result<()> {
        let readings = self.read_all()?;
        self.started = Some(Started {
            at: Instant::now(),
            wall: Utc::now(),
            readings,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<f64> {
        let started = self
            .started
            .take()
            .ok_or_else(|| RunError::emissions_stop("tracker was never started"))?;
        let readings = self
            .read_all()
            .map_err(|e| RunError::emissions_stop(e.to_string()))?;
        let elapsed = started.at.elapsed().as_secs_f64();
        let kwh = self.energy_kwh(&started, &readings, elapsed);
        let kg = kwh * self.carbon_intensity;
        self.append_measurement(started.wall, elapsed, kwh, kg)
            .map_err(|e| RunError::emissions_stop(e.to_string()))?;
        debug!(project = %self.project, kwh, kg, "Emissions measured");
        Ok(kg)
    }
}

/// Builds [`EmissionsMonitor`]s from the pipeline settings.
pub struct MonitorFactory {
    config: EmissionsConfig,
}

impl MonitorFactory {
    pub fn new(config: EmissionsConfig) -> Self {
        Self { config }
    }
}

impl EmissionsTrackerFactory for MonitorFactory {
    fn create(
        &self,
        project_name: &str,
        output_dir: &Path,
    ) -> Result<Box<dyn EmissionsTracker>> {
        if !self.config.enabled {
            return Err(RunError::tracker_init("emissions capture is disabled"));
        }
        Ok(Box::new(EmissionsMonitor::new(
            project_name,
            output_dir,
            &self.config,
        )?))
    }
}
