use crate::config::PolluxConfig;
use crate::core::{Cluster, GpuId, GpuIds, Job};
use crate::sched::{commit, qualifying, rack_qualifying, Placements, Policy};
use std::collections::HashSet;

/// Elastic-resource policy. Instead of taking the requested GPU count as
/// fixed, it scores every width `n` in `[1, requested]` that the cluster
/// can currently serve and places the one maximizing
/// `n^alpha / topology_penalty`. Alpha trades parallelism against the
/// efficiency loss of spreading across racks.
#[derive(Debug)]
pub struct Pollux {
    alpha: f64,
}

impl Pollux {
    pub fn new(config: &PolluxConfig) -> Self {
        Self {
            alpha: config.alpha,
        }
    }
}

/// First rack that can serve `n` GPUs (first `n` of its qualifying
/// list), otherwise the first `n` of the global qualifying list.
pub(crate) fn width_candidate(
    cluster: &Cluster,
    n: usize,
    mem: f64,
    claimed: &HashSet<GpuId>,
    global: &[GpuId],
) -> GpuIds {
    for rack in 0..cluster.racks().len() {
        let qualified = rack_qualifying(cluster, rack, mem, claimed);
        if qualified.len() >= n {
            return qualified[..n].iter().copied().collect();
        }
    }
    global[..n].iter().copied().collect()
}

impl Policy for Pollux {
    fn name(&self) -> &'static str {
        "pollux"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], _now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        for job in pending {
            let mem = job.memory_per_gpu();
            let available = qualifying(cluster, mem, &claimed);
            if available.is_empty() {
                continue;
            }

            let max_n = (job.num_gpus() as usize).min(available.len());
            let mut best: Option<(f64, GpuIds)> = None;
            for n in 1..=max_n {
                let candidate = width_candidate(cluster, n, mem, &claimed, &available);
                let penalty = cluster.penalty(&candidate).max(1.0);
                let score = (n as f64).powf(self.alpha) / penalty;
                if best.as_ref().is_none_or(|(current, _)| score > *current) {
                    best = Some((score, candidate));
                }
            }

            if let Some((_, candidate)) = best {
                if commit(cluster, job, &candidate) {
                    claimed.extend(candidate.iter().copied());
                    placements.push((job.id(), candidate));
                }
            }
        }

        placements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testutil::{cluster, job, round};

    fn pollux(alpha: f64) -> Pollux {
        Pollux::new(&PolluxConfig {
            alpha,
            ..Default::default()
        })
    }

    #[test]
    fn test_grows_to_full_width_in_one_rack() {
        let mut cluster = cluster(1, 4);
        let jobs = vec![job(0, 4, 20.0, 0.0)];

        // Scores with alpha 0.5: n=1 -> 1.0, n=2 -> 1.178, n=3 -> 1.443,
        // n=4 -> 1.667; the full width wins.
        let placements = round(&mut pollux(0.5), &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].1.as_slice(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_pure_cost_minimization_stays_single() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 4, 40.0, 0.0)];

        // Alpha 0 makes every width score 1/penalty; the singleton's 1.0
        // beats any multi-GPU penalty and the strictly-greater rule keeps
        // the smallest width on ties.
        let placements = round(&mut pollux(0.0), &mut cluster, &jobs, 0.0);
        assert_eq!(placements[0].1.len(), 1);
    }

    #[test]
    fn test_shrinks_to_what_the_cluster_can_serve() {
        let mut cluster = cluster(1, 4);
        cluster.gpu_mut(2).allocate(99, 80.0);
        cluster.gpu_mut(3).allocate(99, 80.0);

        let jobs = vec![job(0, 4, 20.0, 0.0)];
        let placements = round(&mut pollux(1.0), &mut cluster, &jobs, 0.0);
        assert_eq!(placements[0].1.as_slice(), &[0, 1]);
    }

    #[test]
    fn test_elastic_width_never_exceeds_request() {
        let mut cluster = cluster(2, 4);
        let jobs = vec![job(0, 3, 10.0, 0.0)];
        let placements = round(&mut pollux(1.0), &mut cluster, &jobs, 0.0);
        assert!(placements[0].1.len() <= 3);
        assert!(!placements[0].1.is_empty());
    }

    #[test]
    fn test_skips_job_when_nothing_qualifies() {
        let mut cluster = cluster(1, 1);
        cluster.gpu_mut(0).allocate(99, 80.0);
        let jobs = vec![job(0, 2, 10.0, 0.0)];
        assert!(round(&mut pollux(0.5), &mut cluster, &jobs, 0.0).is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every elastic placement has width within [1, requested]
            /// and never double-books a GPU within a call.
            #[test]
            fn prop_elastic_bounds(
                alpha in 0.0f64..=1.0,
                gpu_counts in proptest::collection::vec(1u32..6, 1..6),
            ) {
                let mut cluster = crate::sched::testutil::cluster(2, 3);
                let jobs: Vec<_> = gpu_counts
                    .iter()
                    .enumerate()
                    .map(|(i, &n)| crate::sched::testutil::job(i as u32, n, 20.0, 0.0))
                    .collect();

                let placements = round(&mut pollux(alpha), &mut cluster, &jobs, 0.0);
                let mut seen = std::collections::HashSet::new();
                for (id, gpus) in &placements {
                    let requested = jobs[*id as usize].num_gpus() as usize;
                    prop_assert!(!gpus.is_empty());
                    prop_assert!(gpus.len() <= requested);
                    for gpu in gpus {
                        prop_assert!(seen.insert(*gpu), "GPU double-booked in one call");
                    }
                }
            }
        }
    }
}
