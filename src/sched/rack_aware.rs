use crate::core::{Cluster, GpuIds, Job};
use crate::sched::{commit, qualifying, rack_qualifying, Placements, Policy};
use std::collections::HashSet;

/// Prefers placements that stay inside one rack. Small jobs go first
/// (stable sort by requested GPU count, submission order on ties); each
/// job takes the minimum-penalty in-rack option, falling back to a flat
/// first-fit across the cluster when no single rack can hold it.
#[derive(Debug, Default)]
pub struct RackAware;

impl Policy for RackAware {
    fn name(&self) -> &'static str {
        "rack-aware"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], _now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        let mut queue: Vec<&Job> = pending.to_vec();
        queue.sort_by_key(|job| job.num_gpus());

        for job in queue {
            let want = job.num_gpus() as usize;
            let mem = job.memory_per_gpu();

            let mut best: Option<(f64, GpuIds)> = None;
            for rack in 0..cluster.racks().len() {
                let qualified = rack_qualifying(cluster, rack, mem, &claimed);
                if qualified.len() < want {
                    continue;
                }
                let candidate: GpuIds = qualified[..want].iter().copied().collect();
                let penalty = cluster.penalty(&candidate);
                if best.as_ref().is_none_or(|(current, _)| penalty < *current) {
                    best = Some((penalty, candidate));
                }
            }

            let chosen = best.map(|(_, candidate)| candidate).or_else(|| {
                let qualified = qualifying(cluster, mem, &claimed);
                (qualified.len() >= want).then(|| qualified[..want].iter().copied().collect())
            });

            if let Some(candidate) = chosen {
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

    #[test]
    fn test_places_within_a_single_rack() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut RackAware, &mut cluster, &jobs, 0.0);
        assert_eq!(placements[0].1.as_slice(), &[0, 1]);
        assert_eq!(cluster.penalty(&placements[0].1), 1.2);
    }

    #[test]
    fn test_small_jobs_scheduled_first() {
        let mut cluster = cluster(1, 2);
        let jobs = vec![job(0, 2, 60.0, 0.0), job(1, 1, 60.0, 0.0)];

        let placements = round(&mut RackAware, &mut cluster, &jobs, 0.0);
        // The one-GPU job wins the capacity; the two-GPU job no longer fits.
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].0, 1);
    }

    #[test]
    fn test_falls_back_to_cross_rack() {
        let mut cluster = cluster(2, 2);
        cluster.gpu_mut(1).allocate(99, 80.0);
        cluster.gpu_mut(3).allocate(99, 80.0);

        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut RackAware, &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].1.as_slice(), &[0, 2]);
        assert_eq!(cluster.penalty(&placements[0].1), 1.5);
    }

    #[test]
    fn test_prefers_rack_that_can_host_over_earlier_full_rack() {
        let mut cluster = cluster(2, 2);
        cluster.gpu_mut(0).allocate(99, 50.0);

        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut RackAware, &mut cluster, &jobs, 0.0);
        // Rack 0 has only one GPU with 40 GB free, rack 1 has two.
        assert_eq!(placements[0].1.as_slice(), &[2, 3]);
    }
}
