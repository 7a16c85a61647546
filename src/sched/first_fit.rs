use crate::core::{Cluster, GpuIds, Job};
use crate::sched::{commit, Placements, Policy};
use std::collections::HashSet;

/// Walks the flat GPU order and hands every job the first `num_gpus`
/// GPUs that fit its per-GPU memory. Jobs that cannot be fully served
/// this tick are skipped; the queue is never reordered.
#[derive(Debug, Default)]
pub struct FirstFit;

impl Policy for FirstFit {
    fn name(&self) -> &'static str {
        "first-fit"
    }

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], _now: f64) -> Placements {
        let mut placements = Placements::new();
        let mut claimed = HashSet::new();

        for job in pending {
            let want = job.num_gpus() as usize;
            let mem = job.memory_per_gpu();

            let mut picked = GpuIds::new();
            for (id, gpu) in cluster.gpus() {
                if claimed.contains(&id) || !gpu.can_allocate(mem) {
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
