//! Discrete-event simulator for GPU-cluster job scheduling research.
//!
//! A workload of jobs with heterogeneous GPU, memory, and duration
//! requirements is replayed against a pluggable scheduling policy on a
//! modeled rack/GPU topology. The simulator reports per-job completion
//! times, starvation, and cluster-wide GPU consumption.
//!
//! ```no_run
//! use gsim::config::Config;
//! use gsim::core::Cluster;
//! use gsim::metrics::Metrics;
//! use gsim::sched::PolicyKind;
//! use gsim::simulator::{SharingModel, Simulator};
//! use gsim::workload::WorkloadGenerator;
//!
//! let config = Config::default();
//! let cluster = Cluster::from_config(&config.cluster)?;
//! let sharing = SharingModel::from_config(&config.simulator);
//! let policy = PolicyKind::MinGpuTime.build(&config.scheduler, &sharing);
//!
//! let mut generator = WorkloadGenerator::new(config.experiment.seed);
//! let jobs = generator.generate(&config.workload);
//!
//! let mut simulator = Simulator::new(cluster, policy, config.simulator.clone());
//! let mut metrics = Metrics::new(sharing.interpretation());
//! simulator.run(jobs, &mut metrics);
//! metrics.print_summary("min-gpu-time");
//! # Ok::<(), anyhow::Error>(())
//! ```

// Use mimalloc only on x86_64 to avoid cross-compilation issues
#[cfg(target_arch = "x86_64")]
use mimalloc::MiMalloc;

#[cfg(target_arch = "x86_64")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod config;
pub mod core;
pub mod metrics;
pub mod plot;
pub mod sched;
pub mod simulator;
pub mod workload;
