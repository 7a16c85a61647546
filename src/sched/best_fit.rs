use crate::core::{Cluster, GpuIds, Job};
use crate::sched::{commit, Placements, Policy};
use std::cmp::Ordering;
use std::collections::HashSet;

/// First-Fit over GPUs ordered by memory utilization, busiest first:
/// packing into already-loaded GPUs preserves contiguous free GPUs for
/// large future jobs. The order is fixed once per call (stable sort, so
/// equally loaded GPUs keep the flat order).
#[derive(Debug, Default)]
pub struct BestFit;

impl Policy for BestFit {
    fn name(&self) -> &'static str {
        "best-fit"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], _now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        let mut order = cluster.available_gpus();
        order.sort_by(|&a, &b| {
            cluster
                .gpu(b)
                .utilization()
                .partial_cmp(&cluster.gpu(a).utilization())
                .unwrap_or(Ordering::Equal)
        });

        for job in pending {
            let want = job.num_gpus() as usize;
            let mem = job.memory_per_gpu();

            let mut picked = GpuIds::new();
            for &id in &order {
                if claimed.contains(&id) || !cluster.gpu(id).can_allocate(mem) {
                    continue;
                }
                picked.push(id);
                if picked.len() == want {
                    break;
                }
            }

            if picked.len() == want && commit(cluster, job, &picked) {
                claimed.extend(picked.iter().copied());
                placements.push((job.id(), picked));
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
    fn test_prefers_busiest_gpus() {
        let mut cluster = cluster(2, 2);
        cluster.gpu_mut(2).allocate(99, 30.0);
        cluster.gpu_mut(3).allocate(99, 10.0);

        let jobs = vec![job(0, 2, 20.0, 0.0)];
        let placements = round(&mut BestFit, &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
        // Utilizations: gpu2 = 0.375, gpu3 = 0.125, gpu0/1 = 0.
        assert_eq!(placements[0].1.as_slice(), &[2, 3]);
    }

    #[test]
    fn test_ties_keep_flat_order() {
        let mut cluster = cluster(2, 2);
        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut BestFit, &mut cluster, &jobs, 0.0);
        assert_eq!(placements[0].1.as_slice(), &[0, 1]);
    }

    #[test]
    fn test_skips_gpus_that_cannot_fit() {
        let mut cluster = cluster(1, 3);
        cluster.gpu_mut(0).allocate(99, 70.0);

        let jobs = vec![job(0, 2, 40.0, 0.0)];
        let placements = round(&mut BestFit, &mut cluster, &jobs, 0.0);
        assert_eq!(placements.len(), 1);
        // GPU 0 is the busiest but cannot take 40 GB more.
        assert_eq!(placements[0].1.as_slice(), &[1, 2]);
    }
}
