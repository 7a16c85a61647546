use crate::config::MinGpuTimeConfig;
use crate::core::{Cluster, GpuIds, Job};
use crate::sched::{commit, qualifying, rack_qualifying, Placements, Policy};
use std::collections::HashSet;

/// The patient topology-aware policy. It computes the best placement
/// available right now and refuses it when the topology penalty exceeds
/// `patience_threshold`, betting that completions will defragment the
/// cluster. Waiting is bounded: a job past `starvation_limit` is placed
/// on whatever is available, so the bet never turns into starvation as
/// long as the limit stays below the simulator's kill line.
#[derive(Debug)]
pub struct MinGpuTime {
    patience_threshold: f64,
    starvation_limit: f64,
}

impl MinGpuTime {
    pub fn new(config: &MinGpuTimeConfig) -> Self {
        Self {
            patience_threshold: config.patience_threshold,
            starvation_limit: config.starvation_limit,
        }
    }

    /// Minimum-penalty placement available at this instant: the best
    /// single-rack option, or a flat first-fit when no rack has room.
    fn best_placement(
        &self,
        cluster: &Cluster,
        job: &Job,
        claimed: &HashSet<usize>,
    ) -> Option<(f64, GpuIds)> {
        let want = job.num_gpus() as usize;
        let mem = job.memory_per_gpu();

        let mut best: Option<(f64, GpuIds)> = None;
        for rack in 0..cluster.racks().len() {
            let qualified = rack_qualifying(cluster, rack, mem, claimed);
            if qualified.len() < want {
                continue;
            }
            let candidate: GpuIds = qualified[..want].iter().copied().collect();
            let penalty = cluster.penalty(&candidate);
            if best.as_ref().is_none_or(|(current, _)| penalty < *current) {
                best = Some((penalty, candidate));
            }
        }
        if best.is_some() {
            return best;
        }

        let qualified = qualifying(cluster, mem, claimed);
        if qualified.len() < want {
            return None;
        }
        let candidate: GpuIds = qualified[..want].iter().copied().collect();
        let penalty = cluster.penalty(&candidate);
        Some((penalty, candidate))
    }
}

impl Policy for MinGpuTime {
    fn name(&self) -> &'static str {
        "min-gpu-time"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        for job in pending {
            let Some((penalty, candidate)) = self.best_placement(cluster, job, &claimed) else {
                continue;
            };

            let waited = now - job.submission_time();
            let good_placement = penalty <= self.patience_threshold;
            let starving = waited > self.starvation_limit;

            if good_placement || starving {
                if commit(cluster, job, &candidate) {
                    claimed.extend(candidate.iter().copied());
                    placements.push((job.id(), candidate));
                }
            } else {
                tracing::debug!(
                    task = %job.name(),
                    penalty,
                    waited,
                    "placement available but too costly, waiting"
                );
            }
        }

        placements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{cluster, job, round};

    fn policy() -> MinGpuTime {
        MinGpuTime::new(&MinGpuTimeConfig {
            patience_threshold: 1.1,
            starvation_limit: 500.0,
        })
    }

    #[test]
    fn test_places_single_gpu_jobs_immediately() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 1, 40.0, 0.0)];
        // Singleton penalty is 1.0 <= 1.1.
        let placements = round(&mut policy(), &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
    }

    #[test]
    fn test_waits_when_best_penalty_exceeds_patience() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        // Best option is intra-rack at 1.2 > 1.1: wait.
        let placements = round(&mut policy(), &mut cluster, &jobs, 10.0);
        assert!(placements.is_empty());
        assert_eq!(cluster.used_memory_gb(), 0.0);
    }

    #[test]
    fn test_starvation_limit_forces_placement() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut policy(), &mut cluster, &jobs, 501.0);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].1.as_slice(), &[0, 1]);
    }

    #[test]
    fn test_prefers_lowest_penalty_rack_option() {
        let mut cluster = cluster(2, 2);
        cluster.gpu_mut(0).allocate(99, 80.0);

        // Rack 0 can no longer host 2 GPUs; rack 1 can at penalty 1.2.
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut policy(), &mut cluster, &jobs, 501.0);
        assert_eq!(placements[0].1.as_slice(), &[2, 3]);
    }

    #[test]
    fn test_impatient_threshold_places_everywhere() {
        let mut cluster = cluster(2, 2);
        let mut eager = MinGpuTime::new(&MinGpuTimeConfig {
            patience_threshold: 2.0,
            starvation_limit: 500.0,
        });
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut eager, &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
    }
}
