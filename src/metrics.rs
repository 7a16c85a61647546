use crate::core::{Cluster, Job, JobState};
use anyhow::{Context, Result};
use compact_str::CompactString;
use owo_colors::OwoColorize;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Pure snapshot of cluster-wide counters, taken once per tick. The sink
/// never sees live cluster state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterStats {
    pub total_busy_time: f64,
    pub utilization: f64,
}

impl ClusterStats {
    pub fn capture(cluster: &Cluster) -> Self {
        Self {
            total_busy_time: cluster.total_busy_time(),
            utilization: cluster.utilization(),
        }
    }
}

/// Immutable record of one job reaching a terminal state.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub task_id: CompactString,
    pub status: JobState,
    pub num_gpus: u32,
    pub memory_per_gpu: f64,
    pub submission_time: f64,
    pub start_time: Option<f64>,
    pub completion_time: Option<f64>,
    pub estimated_duration: f64,
    pub actual_duration: Option<f64>,
    pub jct: Option<f64>,
    pub wait_time: Option<f64>,
    /// GPU names, rendered here at the reporting boundary. Empty for
    /// jobs that never ran.
    pub allocated_gpus: Vec<CompactString>,
}

impl CompletionRecord {
    pub fn capture(job: &Job, cluster: &Cluster) -> Self {
        Self {
            task_id: job.name().into(),
            status: job.state(),
            num_gpus: job.num_gpus(),
            memory_per_gpu: job.memory_per_gpu(),
            submission_time: job.submission_time(),
            start_time: job.start_time(),
            completion_time: job.completion_time(),
            estimated_duration: job.base_duration(),
            actual_duration: job.actual_duration(),
            jct: job.jct(),
            wait_time: job.wait_time(),
            allocated_gpus: job
                .placement()
                .iter()
                .map(|&id| cluster.gpu_name(id))
                .collect(),
        }
    }
}

/// One timeline sample.
#[derive(Debug, Clone, Copy)]
pub struct TimelinePoint {
    pub time: f64,
    pub total_gpu_time: f64,
    pub cluster_utilization: f64,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
}

/// Write-only interface the simulator feeds. Implementations must copy
/// what they need; every argument is a snapshot value.
pub trait MetricsSink {
    fn record_completion(&mut self, record: CompletionRecord);
    fn record_timeline(&mut self, now: f64, stats: &ClusterStats, running: usize, pending: usize);
    fn update_total_gpu_time(&mut self, stats: &ClusterStats);
}

/// Aggregated view of one simulation run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub scheduler: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub starved_tasks: usize,
    pub total_gpu_time: f64,
    pub average_jct: Option<f64>,
    pub average_wait_time: Option<f64>,
    pub total_jct: f64,
    pub sharing_interpretation: &'static str,
}

/// The standard sink: collects completion records and timeline samples,
/// derives the summary, and persists the CSV artifacts.
#[derive(Debug)]
pub struct Metrics {
    total_gpu_time: f64,
    records: Vec<CompletionRecord>,
    timeline: Vec<TimelinePoint>,
    sharing_interpretation: &'static str,
}

impl Metrics {
    pub fn new(sharing_interpretation: &'static str) -> Self {
        Self {
            total_gpu_time: 0.0,
            records: Vec::new(),
            timeline: Vec::new(),
            sharing_interpretation,
        }
    }

    pub fn records(&self) -> &[CompletionRecord] {
        &self.records
    }

    pub fn timeline(&self) -> &[TimelinePoint] {
        &self.timeline
    }

    pub fn total_gpu_time(&self) -> f64 {
        self.total_gpu_time
    }

    fn completed(&self) -> impl Iterator<Item = &CompletionRecord> {
        self.records
            .iter()
            .filter(|r| r.status == JobState::Completed)
    }

    pub fn average_jct(&self) -> Option<f64> {
        average(self.records.iter().filter_map(|r| r.jct))
    }

    pub fn average_wait_time(&self) -> Option<f64> {
        average(self.records.iter().filter_map(|r| r.wait_time))
    }

    pub fn summary(&self, scheduler: &str) -> Summary {
        Summary {
            scheduler: scheduler.to_string(),
            total_tasks: self.records.len(),
            completed_tasks: self.completed().count(),
            starved_tasks: self
                .records
                .iter()
                .filter(|r| r.status == JobState::Starved)
                .count(),
            total_gpu_time: self.total_gpu_time,
            average_jct: self.average_jct(),
            average_wait_time: self.average_wait_time(),
            total_jct: self.completed().filter_map(|r| r.jct).sum(),
            sharing_interpretation: self.sharing_interpretation,
        }
    }

    /// Write `summary_<tag>.csv`, `tasks_<tag>.csv`, and (when sampled)
    /// `timeline_<tag>.csv` into `output_dir`.
    pub fn save_tables(&self, output_dir: &Path, scheduler: &str, tag: &str) -> Result<()> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output directory {output_dir:?}"))?;

        let summary = self.summary(scheduler);
        let summary_path = output_dir.join(format!("summary_{tag}.csv"));
        let mut writer = csv::Writer::from_path(&summary_path)
            .with_context(|| format!("writing {summary_path:?}"))?;
        let rows = [
            ("metric", "value".to_string()),
            ("scheduler", summary.scheduler.clone()),
            ("total_tasks", summary.total_tasks.to_string()),
            ("completed_tasks", summary.completed_tasks.to_string()),
            ("starved_tasks", summary.starved_tasks.to_string()),
            ("total_gpu_time_s", format_float(summary.total_gpu_time)),
            ("average_jct_s", format_opt(summary.average_jct)),
            ("average_wait_s", format_opt(summary.average_wait_time)),
            ("total_jct_s", format_float(summary.total_jct)),
            (
                "sharing_interpretation",
                summary.sharing_interpretation.to_string(),
            ),
        ];
        for (key, value) in rows {
            writer.write_record([key, value.as_str()])?;
        }
        writer.flush()?;

        let tasks_path = output_dir.join(format!("tasks_{tag}.csv"));
        let mut writer =
            csv::Writer::from_path(&tasks_path).with_context(|| format!("writing {tasks_path:?}"))?;
        writer.write_record([
            "task_id",
            "status",
            "num_gpus",
            "memory_per_gpu",
            "submission_time",
            "start_time",
            "completion_time",
            "estimated_duration",
            "actual_duration",
            "jct",
            "wait_time",
            "allocated_gpus",
        ])?;
        for record in &self.records {
            writer.write_record([
                record.task_id.to_string(),
                record.status.to_string(),
                record.num_gpus.to_string(),
                format_float(record.memory_per_gpu),
                format_float(record.submission_time),
                format_opt(record.start_time),
                format_opt(record.completion_time),
                format_float(record.estimated_duration),
                format_opt(record.actual_duration),
                format_opt(record.jct),
                format_opt(record.wait_time),
                record.allocated_gpus.join(","),
            ])?;
        }
        writer.flush()?;

        if !self.timeline.is_empty() {
            let timeline_path = output_dir.join(format!("timeline_{tag}.csv"));
            let mut writer = csv::Writer::from_path(&timeline_path)
                .with_context(|| format!("writing {timeline_path:?}"))?;
            writer.write_record([
                "time",
                "total_gpu_time",
                "cluster_utilization",
                "running_tasks",
                "pending_tasks",
                "completed_tasks",
            ])?;
            for point in &self.timeline {
                writer.write_record([
                    format_float(point.time),
                    format_float(point.total_gpu_time),
                    format_float(point.cluster_utilization),
                    point.running_tasks.to_string(),
                    point.pending_tasks.to_string(),
                    point.completed_tasks.to_string(),
                ])?;
            }
            writer.flush()?;
        }

        tracing::info!(dir = %output_dir.display(), tag, "metrics tables saved");
        Ok(())
    }

    pub fn print_summary(&self, scheduler: &str) {
        let summary = self.summary(scheduler);
        let rows = vec![
            KvRow::new("scheduler", summary.scheduler.clone()),
            KvRow::new("total tasks", summary.total_tasks.to_string()),
            KvRow::new("completed tasks", summary.completed_tasks.to_string()),
            KvRow::new("starved tasks", summary.starved_tasks.to_string()),
            KvRow::new("total GPU time (s)", format_float(summary.total_gpu_time)),
            KvRow::new("average JCT (s)", format_opt(summary.average_jct)),
            KvRow::new("average wait (s)", format_opt(summary.average_wait_time)),
            KvRow::new("total JCT (s)", format_float(summary.total_jct)),
            KvRow::new("sharing interpretation", summary.sharing_interpretation),
        ];

        println!("\n{}", "Simulation summary".bold());
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    pub fn print_task_table(&self) {
        if self.records.is_empty() {
            println!("No task records.");
            return;
        }

        let rows: Vec<TaskRow> = self.records.iter().map(TaskRow::from).collect();
        println!("\n{}", "Task details".bold());
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}

impl MetricsSink for Metrics {
    fn record_completion(&mut self, record: CompletionRecord) {
        self.records.push(record);
    }

    fn record_timeline(&mut self, now: f64, stats: &ClusterStats, running: usize, pending: usize) {
        let completed_so_far = self.completed().count();
        self.timeline.push(TimelinePoint {
            time: now,
            total_gpu_time: stats.total_busy_time,
            cluster_utilization: stats.utilization,
            running_tasks: running,
            pending_tasks: pending,
            completed_tasks: completed_so_far,
        });
    }

    fn update_total_gpu_time(&mut self, stats: &ClusterStats) {
        self.total_gpu_time = stats.total_busy_time;
    }
}

/// Aggregate every run's summary into `comparison.csv`.
pub fn write_comparison(output_dir: &Path, summaries: &[Summary]) -> Result<()> {
    let path = output_dir.join("comparison.csv");
    let mut writer = csv::Writer::from_path(&path).with_context(|| format!("writing {path:?}"))?;
    writer.write_record([
        "scheduler",
        "total_tasks",
        "completed_tasks",
        "starved_tasks",
        "total_gpu_time_s",
        "average_jct_s",
        "average_wait_s",
        "total_jct_s",
    ])?;
    for summary in summaries {
        writer.write_record([
            summary.scheduler.clone(),
            summary.total_tasks.to_string(),
            summary.completed_tasks.to_string(),
            summary.starved_tasks.to_string(),
            format_float(summary.total_gpu_time),
            format_opt(summary.average_jct),
            format_opt(summary.average_wait_time),
            format_float(summary.total_jct),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), runs = summaries.len(), "comparison table saved");
    Ok(())
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (mut sum, mut count) = (0.0, 0usize);
    for value in values {
        sum += value;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

fn format_float(value: f64) -> String {
    format!("{value:.2}")
}

fn format_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), format_float)
}

#[derive(Tabled)]
struct KvRow {
    metric: &'static str,
    value: String,
}

impl KvRow {
    fn new(metric: &'static str, value: impl Into<String>) -> Self {
        Self {
            metric,
            value: value.into(),
        }
    }
}

#[derive(Tabled)]
struct TaskRow {
    task: String,
    status: String,
    gpus: u32,
    #[tabled(rename = "mem/GPU")]
    memory: String,
    submitted: String,
    started: String,
    completed: String,
    jct: String,
    wait: String,
}

impl From<&CompletionRecord> for TaskRow {
    fn from(record: &CompletionRecord) -> Self {
        Self {
            task: record.task_id.to_string(),
            status: record.status.to_string(),
            gpus: record.num_gpus,
            memory: format_float(record.memory_per_gpu),
            submitted: format_float(record.submission_time),
            started: format_opt(record.start_time),
            completed: format_opt(record.completion_time),
            jct: format_opt(record.jct),
            wait: format_opt(record.wait_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;

    fn record(id: &str, status: JobState, jct: Option<f64>, wait: Option<f64>) -> CompletionRecord {
        CompletionRecord {
            task_id: CompactString::from(id),
            status,
            num_gpus: 2,
            memory_per_gpu: 40.0,
            submission_time: 0.0,
            start_time: wait,
            completion_time: jct,
            estimated_duration: 100.0,
            actual_duration: jct,
            jct,
            wait_time: wait,
            allocated_gpus: vec!["rack-0-0".into(), "rack-0-1".into()],
        }
    }

    #[test]
    fn test_summary_aggregates() {
        let mut metrics = Metrics::new("multiplicative");
        metrics.record_completion(record("t0", JobState::Completed, Some(120.0), Some(0.0)));
        metrics.record_completion(record("t1", JobState::Completed, Some(80.0), Some(10.0)));
        metrics.record_completion(record("t2", JobState::Starved, None, None));
        metrics.update_total_gpu_time(&ClusterStats {
            total_busy_time: 400.0,
            utilization: 0.5,
        });

        let summary = metrics.summary("first-fit");
        assert_eq!(summary.total_tasks, 3);
        assert_eq!(summary.completed_tasks, 2);
        assert_eq!(summary.starved_tasks, 1);
        assert_eq!(summary.total_gpu_time, 400.0);
        assert_eq!(summary.average_jct, Some(100.0));
        assert_eq!(summary.average_wait_time, Some(5.0));
        assert_eq!(summary.total_jct, 200.0);
    }

    #[test]
    fn test_summary_with_no_completions() {
        let mut metrics = Metrics::new("multiplicative");
        metrics.record_completion(record("t0", JobState::Starved, None, None));
        let summary = metrics.summary("best-fit");
        assert_eq!(summary.average_jct, None);
        assert_eq!(summary.total_jct, 0.0);
    }

    #[test]
    fn test_timeline_counts_completed_so_far() {
        let mut metrics = Metrics::new("multiplicative");
        let stats = ClusterStats {
            total_busy_time: 10.0,
            utilization: 0.25,
        };
        metrics.record_timeline(0.0, &stats, 1, 2);
        metrics.record_completion(record("t0", JobState::Completed, Some(60.0), Some(0.0)));
        metrics.record_timeline(60.0, &stats, 0, 2);

        assert_eq!(metrics.timeline()[0].completed_tasks, 0);
        assert_eq!(metrics.timeline()[1].completed_tasks, 1);
        assert_eq!(metrics.timeline()[1].pending_tasks, 2);
    }

    #[test]
    fn test_save_tables_writes_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = Metrics::new("multiplicative");
        metrics.record_completion(record("t0", JobState::Completed, Some(120.0), Some(0.0)));
        metrics.record_timeline(
            0.0,
            &ClusterStats {
                total_busy_time: 0.0,
                utilization: 0.0,
            },
            1,
            0,
        );

        metrics
            .save_tables(dir.path(), "first-fit", "first_fit")
            .unwrap();

        let summary = std::fs::read_to_string(dir.path().join("summary_first_fit.csv")).unwrap();
        assert!(summary.contains("scheduler,first-fit"));
        assert!(summary.contains("average_jct_s,120.00"));
        assert!(summary.contains("sharing_interpretation,multiplicative"));

        let tasks = std::fs::read_to_string(dir.path().join("tasks_first_fit.csv")).unwrap();
        assert!(tasks.starts_with("task_id,status,num_gpus"));
        assert!(tasks.contains("t0,completed,2,40.00,0.00,0.00,120.00,100.00,120.00,120.00,0.00"));
        assert!(tasks.contains("\"rack-0-0,rack-0-1\""));

        assert!(dir.path().join("timeline_first_fit.csv").exists());
    }

    #[test]
    fn test_missing_values_render_as_na() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = Metrics::new("multiplicative");
        let mut starved = record("t9", JobState::Starved, None, None);
        starved.allocated_gpus.clear();
        metrics.record_completion(starved);

        metrics
            .save_tables(dir.path(), "min-gpu-time", "min_gpu_time")
            .unwrap();
        let tasks = std::fs::read_to_string(dir.path().join("tasks_min_gpu_time.csv")).unwrap();
        assert!(tasks.contains("t9,starved,2,40.00,0.00,N/A,N/A,100.00,N/A,N/A,N/A,"));
    }

    #[test]
    fn test_comparison_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut metrics = Metrics::new("multiplicative");
        metrics.record_completion(record("t0", JobState::Completed, Some(100.0), Some(0.0)));
        let summaries = vec![metrics.summary("first-fit"), metrics.summary("pollux")];

        write_comparison(dir.path(), &summaries).unwrap();
        let table = std::fs::read_to_string(dir.path().join("comparison.csv")).unwrap();
        assert!(table.starts_with("scheduler,total_tasks"));
        assert!(table.contains("first-fit,1,1,0,0.00,100.00,0.00,100.00"));
        assert!(table.contains("pollux,"));
    }
}
