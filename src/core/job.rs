use crate::core::{GpuIds, JobId};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

#[derive(Debug, PartialEq, Eq)]
pub enum JobError {
    InvalidTransition { from: JobState, to: JobState },
}

impl std::error::Error for JobError {}
impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition from {} to {}", from, to)
            }
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Starved,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        // Pending → Running → Completed
        //   │
        //   └────> Starved
        matches!((self, next), (Pending, Running) | (Running, Completed) | (Pending, Starved))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Starved)
    }
}

/// A scheduling request with an immutable shape and a mutable lifecycle.
///
/// The shape (GPU count, per-GPU memory, submission time, base duration)
/// never changes after construction. Lifecycle fields only move through
/// [`Job::start`], [`Job::complete`], and [`Job::mark_starved`];
/// schedulers and GPUs refer to jobs by id only.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    name: CompactString,
    num_gpus: u32,
    memory_per_gpu: f64,
    submission_time: f64,
    base_duration: f64,

    state: JobState,
    start_time: Option<f64>,
    completion_time: Option<f64>,
    placement: GpuIds,
    actual_duration: Option<f64>,
}

impl Job {
    pub fn new(
        name: impl Into<CompactString>,
        num_gpus: u32,
        memory_per_gpu: f64,
        submission_time: f64,
        base_duration: f64,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            num_gpus,
            memory_per_gpu,
            submission_time,
            base_duration,
            state: JobState::Pending,
            start_time: None,
            completion_time: None,
            placement: GpuIds::new(),
            actual_duration: None,
        }
    }

    /// Dense id within the simulator's workload list, assigned at setup.
    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: JobId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_gpus(&self) -> u32 {
        self.num_gpus
    }

    pub fn memory_per_gpu(&self) -> f64 {
        self.memory_per_gpu
    }

    pub fn submission_time(&self) -> f64 {
        self.submission_time
    }

    pub fn base_duration(&self) -> f64 {
        self.base_duration
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn completion_time(&self) -> Option<f64> {
        self.completion_time
    }

    pub fn actual_duration(&self) -> Option<f64> {
        self.actual_duration
    }

    /// GPUs the job runs on. Elastic policies may place fewer GPUs than
    /// requested, so the length can differ from `num_gpus`. Completed
    /// jobs keep their placement for reporting.
    pub fn placement(&self) -> &[crate::core::GpuId] {
        &self.placement
    }

    pub fn total_memory_required(&self) -> f64 {
        self.num_gpus as f64 * self.memory_per_gpu
    }

    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Job completion time: `completion_time - submission_time`.
    pub fn jct(&self) -> Option<f64> {
        self.completion_time.map(|t| t - self.submission_time)
    }

    /// Queueing delay: `start_time - submission_time`.
    pub fn wait_time(&self) -> Option<f64> {
        self.start_time.map(|t| t - self.submission_time)
    }

    fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Pending → Running at `now` on `placement`.
    pub fn start(&mut self, now: f64, placement: GpuIds) -> Result<(), JobError> {
        self.transition(JobState::Running)?;
        self.start_time = Some(now);
        self.placement = placement;
        Ok(())
    }

    /// Running → Completed at `now`.
    pub fn complete(&mut self, now: f64) -> Result<(), JobError> {
        self.transition(JobState::Completed)?;
        self.completion_time = Some(now);
        if let Some(start) = self.start_time {
            self.actual_duration = Some(now - start);
        }
        Ok(())
    }

    /// Pending → Starved. Terminal; starved jobs never held a placement.
    pub fn mark_starved(&mut self) -> Result<(), JobError> {
        self.transition(JobState::Starved)
    }
}
