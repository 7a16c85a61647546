pub mod cluster;
pub mod gpu;
pub mod job;
pub mod rack;

pub use cluster::Cluster;
pub use gpu::Gpu;
pub use job::{Job, JobError, JobState};
pub use rack::Rack;

use smallvec::SmallVec;

/// Flat index of a GPU within the cluster (rack-major order).
pub type GpuId = usize;

/// Dense index of a job within the simulator's workload list.
pub type JobId = u32;

/// Placement sets are small; inline storage covers typical requests
/// without touching the heap.
pub type GpuIds = SmallVec<[GpuId; 8]>;
