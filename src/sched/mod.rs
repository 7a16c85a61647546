pub mod best_fit;
pub mod first_fit;
pub mod min_gpu_time;
pub mod pollux;
pub mod pollux_patient;
pub mod rack_aware;

pub use best_fit::BestFit;
pub use first_fit::FirstFit;
pub use min_gpu_time::MinGpuTime;
pub use pollux::Pollux;
pub use pollux_patient::PolluxPatient;
pub use rack_aware::RackAware;

use crate::config::SchedulerConfig;
use crate::core::{Cluster, GpuId, GpuIds, Job, JobId};
use crate::simulator::SharingModel;
use std::collections::HashSet;
use strum::{Display, EnumString};

/// Placements decided in one scheduling call, keyed by job id.
pub type Placements = Vec<(JobId, GpuIds)>;

/// A scheduling policy: the small capability set the simulator needs.
///
/// `schedule` receives the jobs that are PENDING and already submitted at
/// `now`, in submission order. For every placement it returns it must
/// have reserved the memory on the cluster already, so that later
/// decisions within the same call observe cumulative state; no GPU id
/// may appear in two placements of one call. Policies never touch job
/// lifecycle state; that belongs to the simulator. A policy may also
/// refuse to place a feasible job and wait for a better topology.
pub trait Policy {
    fn name(&self) -> &'static str;

    fn schedule(&mut self, cluster: &mut Cluster, pending: &[&Job], now: f64) -> Placements;

    /// Release the reservations of a finished job. Idempotent.
    fn deallocate(&self, cluster: &mut Cluster, job: &Job) {
        for &gpu in job.placement() {
            cluster.gpu_mut(gpu).deallocate(job.id(), job.memory_per_gpu());
        }
    }
}

/// The closed set of scheduling policies selectable by textual key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum PolicyKind {
    FirstFit,
    BestFit,
    RackAware,
    MinGpuTime,
    Pollux,
    PolluxPatient,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::FirstFit,
        PolicyKind::BestFit,
        PolicyKind::RackAware,
        PolicyKind::MinGpuTime,
        PolicyKind::Pollux,
        PolicyKind::PolluxPatient,
    ];

    /// Filesystem-friendly tag used in artifact names.
    pub fn tag(self) -> &'static str {
        match self {
            PolicyKind::FirstFit => "first_fit",
            PolicyKind::BestFit => "best_fit",
            PolicyKind::RackAware => "rack_aware",
            PolicyKind::MinGpuTime => "min_gpu_time",
            PolicyKind::Pollux => "pollux",
            PolicyKind::PolluxPatient => "pollux_patient",
        }
    }

    pub fn build(self, config: &SchedulerConfig, sharing: &SharingModel) -> Box<dyn Policy> {
        match self {
            PolicyKind::FirstFit => Box::new(FirstFit),
            PolicyKind::BestFit => Box::new(BestFit),
            PolicyKind::RackAware => Box::new(RackAware),
            PolicyKind::MinGpuTime => Box::new(MinGpuTime::new(&config.min_gpu_time)),
            PolicyKind::Pollux => Box::new(Pollux::new(&config.pollux)),
            PolicyKind::PolluxPatient => {
                Box::new(PolluxPatient::new(&config.pollux, sharing.clone()))
            }
        }
    }
}

/// GPUs that can take `mem` more GB and are not claimed earlier in this
/// call, in flat cluster order.
pub(crate) fn qualifying(cluster: &Cluster, mem: f64, claimed: &HashSet<GpuId>) -> Vec<GpuId> {
    cluster
        .gpus()
        .filter(|(id, gpu)| !claimed.contains(id) && gpu.can_allocate(mem))
        .map(|(id, _)| id)
        .collect()
}

/// Same filter restricted to one rack.
pub(crate) fn rack_qualifying(
    cluster: &Cluster,
    rack: usize,
    mem: f64,
    claimed: &HashSet<GpuId>,
) -> Vec<GpuId> {
    cluster
        .rack_gpu_ids(rack)
        .filter(|id| !claimed.contains(id) && cluster.gpu(*id).can_allocate(mem))
        .collect()
}

/// Reserve `job`'s per-GPU memory on every GPU of a candidate placement.
/// All-or-nothing: if any GPU no longer fits, nothing is reserved.
pub(crate) fn commit(cluster: &mut Cluster, job: &Job, gpus: &[GpuId]) -> bool {
    let mem = job.memory_per_gpu();
    if !gpus.iter().all(|&id| cluster.gpu(id).can_allocate(mem)) {
        return false;
    }
    for &id in gpus {
        cluster.gpu_mut(id).allocate(job.id(), mem);
    }
    true
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn cluster(racks: usize, gpus_per_rack: usize) -> Cluster {
        Cluster::new(racks, gpus_per_rack, 80.0, 1.2, 1.5).unwrap()
    }

    pub fn job(id: JobId, num_gpus: u32, mem: f64, submitted: f64) -> Job {
        let mut job = Job::new(format!("task-{id}"), num_gpus, mem, submitted, 100.0);
        job.set_id(id);
        job
    }

    /// Run one scheduling round over owned jobs.
    pub fn round(policy: &mut dyn Policy, cluster: &mut Cluster, jobs: &[Job], now: f64) -> Placements {
        let pending: Vec<&Job> = jobs.iter().filter(|j| j.is_pending()).collect();
        policy.schedule(cluster, &pending, now)
    }
}
