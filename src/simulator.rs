use crate::config::{SharingAggregation, SimulatorConfig};
use crate::core::{Cluster, GpuIds, Job, JobId};
use crate::metrics::{ClusterStats, CompletionRecord, MetricsSink};
use crate::sched::Policy;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Co-tenancy model shared by the simulator and the sharing-aware
/// policies: maps the number of jobs resident on a GPU to an efficiency
/// in `(0, 1]`.
#[derive(Clone)]
pub struct SharingModel {
    map: BTreeMap<u32, f64>,
    floor: f64,
    aggregation: SharingAggregation,
    invert: bool,
    custom: Option<Arc<dyn Fn(u32) -> f64 + Send + Sync>>,
}

impl fmt::Debug for SharingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharingModel")
            .field("map", &self.map)
            .field("floor", &self.floor)
            .field("aggregation", &self.aggregation)
            .field("invert", &self.invert)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl SharingModel {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            map: config.sharing_penalty_map.clone(),
            floor: config.sharing_penalty_floor,
            aggregation: config.sharing_penalty_aggregation,
            invert: config.sharing_penalty_invert,
            custom: None,
        }
    }

    /// Replace the lookup table with a custom efficiency function. The
    /// floor/ceiling clamp still applies.
    pub fn with_custom_fn(mut self, f: impl Fn(u32) -> f64 + Send + Sync + 'static) -> Self {
        self.custom = Some(Arc::new(f));
        self
    }

    /// Efficiency of a GPU carrying `residents` jobs, clamped to
    /// `[floor, 1.0]`. Counts beyond the largest configured key reuse
    /// that key's value; an empty table means no sharing loss.
    pub fn efficiency(&self, residents: u32) -> f64 {
        let count = residents.max(1);
        let raw = match &self.custom {
            Some(f) => f(count),
            None => match self.map.get(&count) {
                Some(&value) => value,
                None => self
                    .map
                    .last_key_value()
                    .map(|(_, &value)| value)
                    .unwrap_or(1.0),
            },
        };
        raw.clamp(self.floor, 1.0)
    }

    /// Combine per-GPU efficiencies into one factor for a job.
    pub fn aggregate(&self, efficiencies: impl Iterator<Item = f64>) -> f64 {
        let values: Vec<f64> = efficiencies.collect();
        if values.is_empty() {
            return 1.0;
        }
        match self.aggregation {
            SharingAggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            SharingAggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
        }
    }

    /// The multiplier applied to a job's duration for efficiency `e`.
    ///
    /// The historical behavior multiplies the efficiency in directly, so
    /// co-tenant jobs finish *sooner*; with `sharing_penalty_invert` the
    /// duration is divided by the efficiency instead. The floor clamp
    /// keeps `e` strictly positive either way.
    pub fn duration_factor(&self, efficiency: f64) -> f64 {
        if self.invert {
            1.0 / efficiency
        } else {
            efficiency
        }
    }

    /// Human-readable tag for the run summary, so results always say
    /// which sharing interpretation produced them.
    pub fn interpretation(&self) -> &'static str {
        if self.invert {
            "inverse (efficiency extends duration)"
        } else {
            "multiplicative (efficiency shortens duration)"
        }
    }
}

/// The discrete-event loop. Owns virtual time and the cluster, invokes
/// the policy, advances running jobs under topology and co-tenancy
/// penalties, detects starvation, and feeds the metrics sink.
///
/// Single-threaded and deterministic: for a fixed workload, policy, and
/// time step, two runs produce identical results.
pub struct Simulator {
    cluster: Cluster,
    policy: Box<dyn Policy>,
    config: SimulatorConfig,
    sharing: SharingModel,
    now: f64,
}

impl Simulator {
    pub fn new(cluster: Cluster, policy: Box<dyn Policy>, config: SimulatorConfig) -> Self {
        let sharing = SharingModel::from_config(&config);
        Self {
            cluster,
            policy,
            config,
            sharing,
            now: 0.0,
        }
    }

    /// Override the sharing model, e.g. to install a custom efficiency
    /// function.
    pub fn with_sharing_model(mut self, sharing: SharingModel) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Replay the workload to the end (every job terminal) or until
    /// `max_time`. Jobs still pending at exit are marked starved. The
    /// workload is returned with final lifecycle state for inspection.
    pub fn run(&mut self, mut jobs: Vec<Job>, sink: &mut dyn MetricsSink) -> Vec<Job> {
        jobs.sort_by(|a, b| {
            a.submission_time()
                .partial_cmp(&b.submission_time())
                .unwrap_or(Ordering::Equal)
        });
        for (index, job) in jobs.iter_mut().enumerate() {
            job.set_id(index as JobId);
        }

        tracing::info!(
            tasks = jobs.len(),
            racks = self.cluster.racks().len(),
            gpus = self.cluster.total_gpus(),
            policy = self.policy.name(),
            "starting simulation"
        );

        loop {
            let now = self.now;

            self.sweep_starved(&mut jobs, now, sink);
            self.dispatch(&mut jobs, now);
            self.advance_running(&mut jobs, now, sink);

            self.cluster.tick(self.config.time_step);

            let stats = ClusterStats::capture(&self.cluster);
            sink.update_total_gpu_time(&stats);
            if self.on_timeline_cadence(now) {
                let running = jobs.iter().filter(|j| j.is_running()).count();
                let pending = jobs
                    .iter()
                    .filter(|j| j.is_pending() && j.submission_time() <= now)
                    .count();
                sink.record_timeline(now, &stats, running, pending);
            }

            if jobs.iter().all(Job::is_terminal) {
                tracing::info!(now, "all tasks completed or starved");
                break;
            }
            self.now += self.config.time_step;
            if self.now >= self.config.max_time {
                tracing::warn!(max_time = self.config.max_time, "simulation horizon reached");
                break;
            }
        }

        // Whatever is still pending at exit never got a chance to run.
        for job in jobs.iter_mut() {
            if job.is_pending() && job.mark_starved().is_ok() {
                sink.record_completion(CompletionRecord::capture(job, &self.cluster));
            }
        }

        tracing::info!(now = self.now, "simulation finished");
        jobs
    }

    /// Terminal classification of jobs pending longer than the
    /// starvation threshold. An infinite threshold never fires.
    fn sweep_starved(&mut self, jobs: &mut [Job], now: f64, sink: &mut dyn MetricsSink) {
        for job in jobs.iter_mut() {
            if !job.is_pending() || job.submission_time() > now {
                continue;
            }
            let waited = now - job.submission_time();
            if waited > self.config.starvation_threshold && job.mark_starved().is_ok() {
                tracing::info!(task = %job.name(), waited, "task starved");
                sink.record_completion(CompletionRecord::capture(job, &self.cluster));
            }
        }
    }

    /// One scheduling round: collect the pending set, let the policy
    /// decide, and start the jobs it placed.
    fn dispatch(&mut self, jobs: &mut [Job], now: f64) {
        let pending: Vec<&Job> = jobs
            .iter()
            .filter(|j| j.is_pending() && j.submission_time() <= now)
            .collect();
        if pending.is_empty() {
            return;
        }
        let placements = self.policy.schedule(&mut self.cluster, &pending, now);

        for (id, gpus) in placements {
            let job = &mut jobs[id as usize];
            if !placement_applied(&self.cluster, job.id(), &gpus) {
                // A policy returning GPUs it never reserved is a policy
                // bug; drop the placement and leave the job pending.
                tracing::error!(
                    task = %job.name(),
                    ?gpus,
                    "rejecting placement that was not applied to the cluster"
                );
                release(&mut self.cluster, job.id(), job.memory_per_gpu(), &gpus);
                continue;
            }
            match job.start(now, gpus.clone()) {
                Ok(()) => {
                    tracing::debug!(task = %job.name(), gpus = gpus.len(), now, "task started")
                }
                Err(err) => {
                    tracing::error!(task = %job.name(), %err, "refusing placement");
                    release(&mut self.cluster, job.id(), job.memory_per_gpu(), &gpus);
                }
            }
        }
    }

    /// Completion check for every running job against its effective
    /// duration under the current occupancy.
    fn advance_running(&mut self, jobs: &mut [Job], now: f64, sink: &mut dyn MetricsSink) {
        for index in 0..jobs.len() {
            if !jobs[index].is_running() {
                continue;
            }
            let Some(started) = jobs[index].start_time() else {
                continue;
            };
            let effective = self.effective_duration(&jobs[index]);
            if now - started >= effective {
                let job = &mut jobs[index];
                if job.complete(now).is_ok() {
                    self.policy.deallocate(&mut self.cluster, job);
                    sink.record_completion(CompletionRecord::capture(job, &self.cluster));
                    tracing::debug!(task = %job.name(), now, "task completed");
                }
            }
        }
    }

    /// `D_eff = base_duration * topology_penalty * sharing_factor`,
    /// recomputed each tick from the current occupancy of the job's
    /// GPUs: the deadline moves as neighbors arrive and leave.
    fn effective_duration(&self, job: &Job) -> f64 {
        let placement = job.placement();
        let topology = self.cluster.penalty(placement);
        let efficiency = self.sharing.aggregate(
            placement
                .iter()
                .map(|&id| self.sharing.efficiency(self.cluster.gpu(id).residents().len() as u32)),
        );
        job.base_duration() * topology * self.sharing.duration_factor(efficiency)
    }

    fn on_timeline_cadence(&self, now: f64) -> bool {
        let interval = self.config.timeline_interval.floor();
        interval >= 1.0 && (now.floor() as i64) % (interval as i64) == 0
    }
}

/// True when every GPU of the placement knows about the job.
fn placement_applied(cluster: &Cluster, job: JobId, gpus: &GpuIds) -> bool {
    gpus.iter()
        .all(|&id| cluster.gpu(id).residents().contains(&job))
}

fn release(cluster: &mut Cluster, job: JobId, mem: f64, gpus: &GpuIds) {
    for &id in gpus {
        cluster.gpu_mut(id).deallocate(job, mem);
    }
}
