use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::{Display, EnumString};

/// Layered run configuration: serde defaults, then an optional TOML
/// file, then `GSIM__`-prefixed environment variables.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub workload: WorkloadConfig,
    pub simulator: SimulatorConfig,
    pub scheduler: SchedulerConfig,
    pub experiment: ExperimentConfig,
}

/// Shape of the modeled cluster.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub num_racks: usize,
    pub gpus_per_rack: usize,
    /// Memory of every GPU (GB).
    pub gpu_memory_gb: f64,
    /// Duration multiplier for multi-GPU placements inside one rack.
    pub intra_rack_penalty: f64,
    /// Duration multiplier for placements spanning racks.
    pub inter_rack_penalty: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_racks: 8,
            gpus_per_rack: 8,
            gpu_memory_gb: 80.0,
            intra_rack_penalty: 1.4,
            inter_rack_penalty: 2.1,
        }
    }
}

/// Ranges for the random workload generator.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkloadConfig {
    pub num_tasks: usize,
    pub min_gpus: u32,
    pub max_gpus: u32,
    pub min_memory_gb: f64,
    pub max_memory_gb: f64,
    pub min_duration_s: f64,
    pub max_duration_s: f64,
    /// Submission times are drawn uniformly from `[0, window)`.
    pub submission_window_s: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_tasks: 100,
            min_gpus: 1,
            max_gpus: 16,
            min_memory_gb: 2.0,
            max_memory_gb: 60.0,
            min_duration_s: 10.0,
            max_duration_s: 1800.0,
            submission_window_s: 1800.0,
        }
    }
}

/// How per-GPU sharing efficiencies combine into one factor per job.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SharingAggregation {
    Min,
    Average,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Virtual-time horizon in seconds; infinite means "run until done".
    pub max_time: f64,
    /// Jobs pending longer than this are terminally starved; infinite
    /// means "never".
    pub starvation_threshold: f64,
    pub time_step: f64,
    /// Cadence of timeline snapshots, in seconds.
    pub timeline_interval: f64,
    /// Co-tenancy efficiency per resident-job count. Counts beyond the
    /// largest key reuse its value.
    #[serde(deserialize_with = "deserialize_sharing_map")]
    pub sharing_penalty_map: BTreeMap<u32, f64>,
    /// Lower clamp for sharing efficiencies; keeps them strictly positive.
    pub sharing_penalty_floor: f64,
    pub sharing_penalty_aggregation: SharingAggregation,
    /// When true, co-tenancy divides the duration by the efficiency (a
    /// genuine slowdown) instead of multiplying it in as-is.
    pub sharing_penalty_invert: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_time: f64::INFINITY,
            starvation_threshold: f64::INFINITY,
            time_step: 1.0,
            timeline_interval: 60.0,
            sharing_penalty_map: BTreeMap::from([(1, 1.0), (2, 0.9), (3, 0.8)]),
            sharing_penalty_floor: 0.5,
            sharing_penalty_aggregation: SharingAggregation::Min,
            sharing_penalty_invert: false,
        }
    }
}

/// Accepts the sharing map with either integer or string keys. TOML
/// tables only carry string keys, so `{ "2" = 0.9 }` must land on the
/// same `BTreeMap<u32, f64>` as a literal `{ 2: 0.9 }` from code.
fn deserialize_sharing_map<'de, D>(deserializer: D) -> Result<BTreeMap<u32, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize, PartialEq, Eq, Hash)]
    #[serde(untagged)]
    enum Key {
        Int(u32),
        Str(String),
    }

    let raw = std::collections::HashMap::<Key, f64>::deserialize(deserializer)?;
    let mut map = BTreeMap::new();
    for (key, value) in raw {
        let key = match key {
            Key::Int(k) => k,
            Key::Str(s) => s
                .parse::<u32>()
                .map_err(|e| D::Error::custom(format!("invalid sharing map key {s:?}: {e}")))?,
        };
        map.insert(key, value);
    }
    Ok(map)
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MinGpuTimeConfig {
    /// Largest acceptable topology penalty before the policy waits.
    pub patience_threshold: f64,
    /// Waiting beyond this forces placement; must stay below the
    /// simulator's starvation threshold.
    pub starvation_limit: f64,
}

impl Default for MinGpuTimeConfig {
    fn default() -> Self {
        Self {
            patience_threshold: 1.1,
            starvation_limit: 2000.0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PolluxConfig {
    /// 0.0 = pure cost minimization, 1.0 = pure parallelism maximization.
    pub alpha: f64,
    /// Minimum predicted efficiency (1/cost) the patient variant accepts.
    pub efficiency_threshold: f64,
    pub starvation_limit: f64,
}

impl Default for PolluxConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            efficiency_threshold: 0.8,
            starvation_limit: 2000.0,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub min_gpu_time: MinGpuTimeConfig,
    pub pollux: PolluxConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Seed for the workload generator; the only randomness in a run.
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            output_dir: PathBuf::from("results"),
        }
    }
}

impl Config {
    /// Configuration errors fail early, before any simulation state is
    /// built.
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.cluster;
        if c.num_racks == 0 || c.gpus_per_rack == 0 {
            anyhow::bail!("cluster shape must be at least 1x1");
        }
        if c.gpu_memory_gb <= 0.0 {
            anyhow::bail!("gpu_memory_gb must be positive");
        }
        if c.intra_rack_penalty < 1.0 || c.inter_rack_penalty < c.intra_rack_penalty {
            anyhow::bail!("penalties must satisfy 1.0 <= intra <= inter");
        }

        let w = &self.workload;
        if w.min_gpus == 0 || w.max_gpus < w.min_gpus {
            anyhow::bail!("workload GPU range must satisfy 1 <= min <= max");
        }
        if w.min_memory_gb <= 0.0 || w.max_memory_gb < w.min_memory_gb {
            anyhow::bail!("workload memory range must satisfy 0 < min <= max");
        }
        if w.min_duration_s < 0.0 || w.max_duration_s < w.min_duration_s {
            anyhow::bail!("workload duration range must satisfy 0 <= min <= max");
        }
        if w.submission_window_s < 0.0 {
            anyhow::bail!("submission_window_s must be non-negative");
        }

        let s = &self.simulator;
        if !(s.time_step > 0.0) {
            anyhow::bail!("time_step must be positive");
        }
        if !(s.max_time > 0.0) {
            anyhow::bail!("max_time must be positive");
        }
        if !(s.starvation_threshold > 0.0) {
            anyhow::bail!("starvation_threshold must be positive");
        }
        if s.timeline_interval < 1.0 {
            anyhow::bail!("timeline_interval must be at least 1 second");
        }
        if !(s.sharing_penalty_floor > 0.0 && s.sharing_penalty_floor <= 1.0) {
            anyhow::bail!("sharing_penalty_floor must be in (0, 1]");
        }
        for (&count, &value) in &s.sharing_penalty_map {
            if count == 0 || !(value > 0.0 && value <= 1.0) {
                anyhow::bail!(
                    "sharing_penalty_map entries must map positive counts to (0, 1], got {count} -> {value}"
                );
            }
        }

        let sched = &self.scheduler;
        if sched.min_gpu_time.patience_threshold < 1.0 {
            anyhow::bail!("patience_threshold must be at least 1.0");
        }
        if !(sched.min_gpu_time.starvation_limit > 0.0) {
            anyhow::bail!("min_gpu_time starvation_limit must be positive");
        }
        if !(0.0..=1.0).contains(&sched.pollux.alpha) {
            anyhow::bail!("pollux alpha must be in [0, 1]");
        }
        if !(sched.pollux.efficiency_threshold > 0.0 && sched.pollux.efficiency_threshold <= 1.0) {
            anyhow::bail!("pollux efficiency_threshold must be in (0, 1]");
        }
        if !(sched.pollux.starvation_limit > 0.0) {
            anyhow::bail!("pollux starvation_limit must be positive");
        }

        Ok(())
    }

    /// Patient policies must give up waiting before the simulator's kill
    /// line, or their patience turns into starvation.
    pub fn validate_patience(&self, starvation_limit: f64) -> anyhow::Result<()> {
        if starvation_limit >= self.simulator.starvation_threshold {
            anyhow::bail!(
                "scheduler starvation_limit ({starvation_limit}) must stay below the simulator starvation_threshold ({})",
                self.simulator.starvation_threshold
            );
        }
        Ok(())
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("gsim"))
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gsim.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GSIM")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_default_sharing_map() {
        let config = SimulatorConfig::default();
        assert_eq!(config.sharing_penalty_map.get(&2), Some(&0.9));
        assert_eq!(config.sharing_penalty_aggregation, SharingAggregation::Min);
        assert!(config.max_time.is_infinite());
    }

    #[test]
    fn test_validate_rejects_bad_penalties() {
        let mut config = Config::default();
        config.cluster.intra_rack_penalty = 0.8;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cluster.inter_rack_penalty = 1.0;
        config.cluster.intra_rack_penalty = 1.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sharing() {
        let mut config = Config::default();
        config.simulator.sharing_penalty_floor = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulator.sharing_penalty_map.insert(4, 1.3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sharing_map_accepts_string_keys() {
        let toml = r#"
            sharing_penalty_map = { "1" = 1.0, "2" = 0.85 }
        "#;
        let config: SimulatorConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.sharing_penalty_map.get(&2), Some(&0.85));
    }

    #[test]
    fn test_patience_must_undercut_starvation_threshold() {
        let mut config = Config::default();
        config.simulator.starvation_threshold = 1000.0;
        assert!(config
            .validate_patience(config.scheduler.min_gpu_time.starvation_limit)
            .is_err());

        config.simulator.starvation_threshold = 4000.0;
        assert!(config
            .validate_patience(config.scheduler.min_gpu_time.starvation_limit)
            .is_ok());
    }

    #[test]
    fn test_aggregation_parses() {
        assert_eq!(
            "average".parse::<SharingAggregation>().unwrap(),
            SharingAggregation::Average
        );
        assert_eq!(SharingAggregation::Min.to_string(), "min");
    }
}
