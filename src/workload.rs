use crate::config::WorkloadConfig;
use crate::core::Job;
use anyhow::{Context, Result};
use compact_str::{format_compact, CompactString};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::path::Path;

/// One row of a workload CSV.
#[derive(Debug, Deserialize)]
struct WorkloadRow {
    task_id: CompactString,
    num_gpus: u32,
    memory_per_gpu_gb: f64,
    submission_time_s: f64,
    estimated_duration_s: f64,
}

/// Load a user-supplied workload. Columns:
/// `task_id,num_gpus,memory_per_gpu_gb,submission_time_s,estimated_duration_s`.
pub fn load_workload(path: &Path) -> Result<Vec<Job>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("reading workload {path:?}"))?;

    let mut jobs = Vec::new();
    for (line, row) in reader.deserialize::<WorkloadRow>().enumerate() {
        let row = row.with_context(|| format!("parsing workload {path:?}"))?;
        if row.num_gpus == 0 {
            anyhow::bail!("workload row {line}: num_gpus must be at least 1");
        }
        if row.memory_per_gpu_gb <= 0.0 {
            anyhow::bail!("workload row {line}: memory_per_gpu_gb must be positive");
        }
        if row.submission_time_s < 0.0 || row.estimated_duration_s < 0.0 {
            anyhow::bail!("workload row {line}: times must be non-negative");
        }
        jobs.push(Job::new(
            row.task_id,
            row.num_gpus,
            row.memory_per_gpu_gb,
            row.submission_time_s,
            row.estimated_duration_s,
        ));
    }

    tracing::info!(tasks = jobs.len(), path = %path.display(), "workload loaded");
    Ok(jobs)
}

/// Seeded random workload source. The seed is the only randomness of a
/// run; the same seed always produces the same job list.
#[derive(Debug)]
pub struct WorkloadGenerator {
    rng: StdRng,
}

impl WorkloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw `num_tasks` jobs uniformly from the configured ranges.
    pub fn generate(&mut self, config: &WorkloadConfig) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(config.num_tasks);
        for index in 0..config.num_tasks {
            let num_gpus = self.rng.random_range(config.min_gpus..=config.max_gpus);
            let memory = self
                .rng
                .random_range(config.min_memory_gb..=config.max_memory_gb);
            let duration = self
                .rng
                .random_range(config.min_duration_s..=config.max_duration_s);
            let submission = self.submission(config.submission_window_s);
            jobs.push(Job::new(
                format_compact!("task-{index}"),
                num_gpus,
                memory,
                submission,
                duration,
            ));
        }
        jobs
    }

    /// Identically shaped jobs with random submission times, for
    /// controlled experiments.
    pub fn generate_uniform(
        &mut self,
        num_tasks: usize,
        num_gpus: u32,
        memory_per_gpu: f64,
        duration: f64,
        submission_window: f64,
    ) -> Vec<Job> {
        (0..num_tasks)
            .map(|index| {
                let submission = self.submission(submission_window);
                Job::new(
                    format_compact!("task-{index}"),
                    num_gpus,
                    memory_per_gpu,
                    submission,
                    duration,
                )
            })
            .collect()
    }

    fn submission(&mut self, window: f64) -> f64 {
        if window > 0.0 {
            self.rng.random_range(0.0..window)
        } else {
            0.0
        }
    }
}
