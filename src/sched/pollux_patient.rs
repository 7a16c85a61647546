use crate::config::PolluxConfig;
use crate::core::{Cluster, GpuId, GpuIds, Job};
use crate::sched::{commit, qualifying, rack_qualifying, Placements, Policy};
use crate::simulator::SharingModel;
use std::cmp::Ordering;
use std::collections::HashSet;

/// The elastic policy extended with co-tenancy awareness and patience.
/// Candidates are costed as `topology_penalty / predicted_efficiency`,
/// where the predicted efficiency of a GPU is the sharing value it would
/// have with one more resident job. A placement is taken only when its
/// overall efficiency clears `efficiency_threshold`, or when the job has
/// waited past `starvation_limit`.
pub struct PolluxPatient {
    alpha: f64,
    efficiency_threshold: f64,
    starvation_limit: f64,
    sharing: SharingModel,
}

impl PolluxPatient {
    pub fn new(config: &PolluxConfig, sharing: SharingModel) -> Self {
        Self {
            alpha: config.alpha,
            efficiency_threshold: config.efficiency_threshold,
            starvation_limit: config.starvation_limit,
            sharing,
        }
    }

    /// Sharing efficiency this GPU would run at with one more resident.
    fn predicted_efficiency(&self, cluster: &Cluster, gpu: GpuId) -> f64 {
        self.sharing
            .efficiency(cluster.gpu(gpu).residents().len() as u32 + 1)
    }

    fn sort_by_efficiency(&self, cluster: &Cluster, gpus: &mut [GpuId]) {
        gpus.sort_by(|&a, &b| {
            self.predicted_efficiency(cluster, b)
                .partial_cmp(&self.predicted_efficiency(cluster, a))
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Mean predicted efficiency and total cost of one candidate.
    fn cost(&self, cluster: &Cluster, candidate: &[GpuId]) -> f64 {
        let topology = cluster.penalty(candidate);
        let mean_efficiency = candidate
            .iter()
            .map(|&gpu| self.predicted_efficiency(cluster, gpu))
            .sum::<f64>()
            / candidate.len() as f64;
        topology / mean_efficiency
    }
}

impl Policy for PolluxPatient {
    fn name(&self) -> &'static str {
        "pollux-patient"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        for job in pending {
            let mem = job.memory_per_gpu();
            let available = qualifying(cluster, mem, &claimed);
            if available.is_empty() {
                continue;
            }

            let max_n = (job.num_gpus() as usize).min(available.len());
            let mut best: Option<(f64, f64, GpuIds)> = None; // (score, cost, placement)

            for n in 1..=max_n {
                let mut candidates: Vec<GpuIds> = Vec::new();

                // One candidate per rack that can serve the width, its
                // least-shared GPUs first.
                for rack in 0..cluster.racks().len() {
                    let mut qualified = rack_qualifying(cluster, rack, mem, &claimed);
                    if qualified.len() < n {
                        continue;
                    }
                    self.sort_by_efficiency(cluster, &mut qualified);
                    candidates.push(qualified[..n].iter().copied().collect());
                }

                // The global candidate, likewise preferring idle GPUs.
                let mut global = available.clone();
                self.sort_by_efficiency(cluster, &mut global);
                candidates.push(global[..n].iter().copied().collect());

                for candidate in candidates {
                    let cost = self.cost(cluster, &candidate).max(1.0);
                    let score = (n as f64).powf(self.alpha) / cost;
                    if best.as_ref().is_none_or(|(current, _, _)| score > *current) {
                        best = Some((score, cost, candidate));
                    }
                }
            }

            if let Some((_, cost, candidate)) = best {
                let efficiency = 1.0 / cost;
                let waited = now - job.submission_time();
                let efficient_enough = efficiency >= self.efficiency_threshold;
                let starving = waited > self.starvation_limit;

                if efficient_enough || starving {
                    if commit(cluster, job, &candidate) {
                        claimed.extend(candidate.iter().copied());
                        placements.push((job.id(), candidate));
                    }
                } else {
                    tracing::debug!(
                        task = %job.name(),
                        efficiency,
                        waited,
                        "predicted efficiency below threshold, waiting"
                    );
                }
            }
        }

        placements
    }
}
