//! SVG renderings of a finished run: a per-GPU Gantt chart with
//! sub-tracks for co-tenant jobs, and the cluster-utilization timeline.
//! Charts are plain hand-built SVG so the artifacts need no native
//! plotting stack.

use crate::core::JobState;
use crate::metrics::{CompletionRecord, Metrics, TimelinePoint};
use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::Path;

const WIDTH: usize = 1200;
const MARGIN_LEFT: usize = 110;
const MARGIN_RIGHT: usize = 30;
const MARGIN_TOP: usize = 50;
const MARGIN_BOTTOM: usize = 40;
const TRACK_HEIGHT: usize = 16;

/// Write `gantt_<tag>.svg` and `utilization_<tag>.svg` into `output_dir`.
pub fn save_plots(metrics: &Metrics, output_dir: &Path, tag: &str) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {output_dir:?}"))?;

    let gantt_path = output_dir.join(format!("gantt_{tag}.svg"));
    std::fs::write(&gantt_path, render_gantt(metrics.records(), tag))
        .with_context(|| format!("writing {gantt_path:?}"))?;

    let util_path = output_dir.join(format!("utilization_{tag}.svg"));
    std::fs::write(&util_path, render_utilization(metrics.timeline(), tag))
        .with_context(|| format!("writing {util_path:?}"))?;

    tracing::info!(dir = %output_dir.display(), tag, "plots saved");
    Ok(())
}

/// Deterministic pastel color per task id.
fn task_color(task_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    task_id.hash(&mut hasher);
    let bits = hasher.finish();
    // Keep every channel in [128, 255] for readable pastel bars.
    let r = 128 + (bits & 0x7f);
    let g = 128 + ((bits >> 8) & 0x7f);
    let b = 128 + ((bits >> 16) & 0x7f);
    format!("rgb({r},{g},{b})")
}

/// Sort key of a `rack-R-G` name; unknown shapes sort first.
fn gpu_sort_key(name: &str) -> (usize, usize) {
    let mut parts = name.split('-').skip(1);
    let rack = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let ordinal = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (rack, ordinal)
}

struct Bar<'a> {
    task_id: &'a str,
    start: f64,
    end: f64,
}

/// Per-GPU sub-track layout: bars that overlap in time go to separate
/// tracks so co-tenant jobs stay visible.
fn assign_tracks<'a>(bars: &[Bar<'a>]) -> Vec<(usize, &'a str, f64, f64)> {
    let mut track_ends: Vec<f64> = Vec::new();
    let mut placed = Vec::with_capacity(bars.len());
    for bar in bars {
        let track = track_ends
            .iter()
            .position(|&end| bar.start >= end)
            .unwrap_or_else(|| {
                track_ends.push(f64::NEG_INFINITY);
                track_ends.len() - 1
            });
        track_ends[track] = bar.end;
        placed.push((track, bar.task_id, bar.start, bar.end));
    }
    placed
}

pub fn render_gantt(records: &[CompletionRecord], title: &str) -> String {
    let completed: Vec<&CompletionRecord> = records
        .iter()
        .filter(|r| r.status == JobState::Completed && !r.allocated_gpus.is_empty())
        .collect();

    if completed.is_empty() {
        return empty_chart(&format!("Gantt: {title}"), "no completed tasks");
    }

    // Bars grouped by GPU, in start order.
    let mut per_gpu: HashMap<&str, Vec<Bar>> = HashMap::new();
    for record in &completed {
        let (Some(start), Some(end)) = (record.start_time, record.completion_time) else {
            continue;
        };
        for gpu in &record.allocated_gpus {
            per_gpu.entry(gpu.as_str()).or_default().push(Bar {
                task_id: &record.task_id,
                start,
                end,
            });
        }
    }
    let mut gpus: Vec<&str> = per_gpu.keys().copied().collect();
    gpus.sort_by_key(|name| gpu_sort_key(name));
    for bars in per_gpu.values_mut() {
        bars.sort_by(|a, b| a.start.total_cmp(&b.start));
    }

    let min_time = completed
        .iter()
        .filter_map(|r| r.start_time)
        .fold(f64::INFINITY, f64::min);
    let max_time = completed
        .iter()
        .filter_map(|r| r.completion_time)
        .fold(0.0, f64::max);
    let span = (max_time - min_time).max(1.0);

    let layouts: Vec<(usize, Vec<(usize, &str, f64, f64)>)> = gpus
        .iter()
        .map(|name| {
            let placed = assign_tracks(&per_gpu[name]);
            let tracks = placed.iter().map(|(t, ..)| t + 1).max().unwrap_or(1);
            (tracks, placed)
        })
        .collect();

    let total_tracks: usize = layouts.iter().map(|(tracks, _)| tracks).sum();
    let height = MARGIN_TOP + total_tracks * TRACK_HEIGHT + MARGIN_BOTTOM;
    let plot_width = (WIDTH - MARGIN_LEFT - MARGIN_RIGHT) as f64;
    let x = |t: f64| MARGIN_LEFT as f64 + (t - min_time) / span * plot_width;

    let mut svg = svg_open(WIDTH, height);
    let _ = write!(
        svg,
        r#"<text x="{}" y="28" font-size="18" font-weight="bold" text-anchor="middle">Task placement: {}</text>"#,
        WIDTH / 2,
        title
    );

    let mut row_y = MARGIN_TOP;
    for (index, (name, (tracks, placed))) in gpus.iter().zip(&layouts).enumerate() {
        let row_height = tracks * TRACK_HEIGHT;
        if index % 2 == 0 {
            let _ = write!(
                svg,
                r##"<rect x="{MARGIN_LEFT}" y="{row_y}" width="{}" height="{row_height}" fill="#f4f4f4"/>"##,
                WIDTH - MARGIN_LEFT - MARGIN_RIGHT
            );
        }
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-size="11" text-anchor="end">{name}</text>"#,
            MARGIN_LEFT - 8,
            row_y + row_height / 2 + 4
        );
        for (track, task_id, start, end) in placed {
            let bar_y = row_y + track * TRACK_HEIGHT + 2;
            let bar_x = x(*start);
            let bar_w = (x(*end) - bar_x).max(1.0);
            let _ = write!(
                svg,
                r##"<rect x="{bar_x:.1}" y="{bar_y}" width="{bar_w:.1}" height="{}" fill="{}" stroke="#666" stroke-width="0.5"><title>{task_id}: {start:.1}-{end:.1}s</title></rect>"##,
                TRACK_HEIGHT - 4,
                task_color(task_id)
            );
        }
        row_y += row_height;
    }

    time_axis(&mut svg, min_time, max_time, row_y, x);
    svg.push_str("</svg>");
    svg
}

pub fn render_utilization(timeline: &[TimelinePoint], title: &str) -> String {
    if timeline.is_empty() {
        return empty_chart(&format!("Utilization: {title}"), "no timeline samples");
    }

    let height = 400;
    let plot_width = (WIDTH - MARGIN_LEFT - MARGIN_RIGHT) as f64;
    let plot_height = (height - MARGIN_TOP - MARGIN_BOTTOM) as f64;
    let min_time = timeline.first().map(|p| p.time).unwrap_or(0.0);
    let max_time = timeline.last().map(|p| p.time).unwrap_or(1.0);
    let span = (max_time - min_time).max(1.0);
    let x = |t: f64| MARGIN_LEFT as f64 + (t - min_time) / span * plot_width;
    let y = |u: f64| MARGIN_TOP as f64 + (1.0 - u.clamp(0.0, 1.0)) * plot_height;

    let mut svg = svg_open(WIDTH, height);
    let _ = write!(
        svg,
        r#"<text x="{}" y="28" font-size="18" font-weight="bold" text-anchor="middle">Cluster utilization: {}</text>"#,
        WIDTH / 2,
        title
    );

    // Horizontal guides at 0/50/100%.
    for (fraction, label) in [(0.0, "0%"), (0.5, "50%"), (1.0, "100%")] {
        let guide_y = y(fraction);
        let _ = write!(
            svg,
            r##"<line x1="{MARGIN_LEFT}" y1="{guide_y:.1}" x2="{}" y2="{guide_y:.1}" stroke="#ddd"/>"##,
            WIDTH - MARGIN_RIGHT
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{:.1}" font-size="11" text-anchor="end">{label}</text>"#,
            MARGIN_LEFT - 8,
            guide_y + 4.0
        );
    }

    let points: Vec<String> = timeline
        .iter()
        .map(|p| format!("{:.1},{:.1}", x(p.time), y(p.cluster_utilization)))
        .collect();
    let _ = write!(
        svg,
        r##"<polyline points="{}" fill="none" stroke="#4878b0" stroke-width="1.5"/>"##,
        points.join(" ")
    );

    time_axis(
        &mut svg,
        min_time,
        max_time,
        height - MARGIN_BOTTOM,
        x,
    );
    svg.push_str("</svg>");
    svg
}

fn svg_open(width: usize, height: usize) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="sans-serif">"#
    )
}

fn empty_chart(title: &str, reason: &str) -> String {
    let mut svg = svg_open(WIDTH, 120);
    let _ = write!(
        svg,
        r#"<text x="{}" y="40" font-size="18" font-weight="bold" text-anchor="middle">{title}</text>"#,
        WIDTH / 2
    );
    let _ = write!(
        svg,
        r##"<text x="{}" y="80" font-size="13" text-anchor="middle" fill="#888">{reason}</text>"##,
        WIDTH / 2
    );
    svg.push_str("</svg>");
    svg
}

fn time_axis(svg: &mut String, min_time: f64, max_time: f64, axis_y: usize, x: impl Fn(f64) -> f64) {
    let _ = write!(
        svg,
        r##"<line x1="{MARGIN_LEFT}" y1="{axis_y}" x2="{}" y2="{axis_y}" stroke="#333"/>"##,
        WIDTH - MARGIN_RIGHT
    );
    let span = (max_time - min_time).max(1.0);
    for step in 0..=5 {
        let t = min_time + span * f64::from(step) / 5.0;
        let tick_x = x(t);
        let _ = write!(
            svg,
            r##"<line x1="{tick_x:.1}" y1="{axis_y}" x2="{tick_x:.1}" y2="{}" stroke="#333"/>"##,
            axis_y + 4
        );
        let _ = write!(
            svg,
            r#"<text x="{tick_x:.1}" y="{}" font-size="11" text-anchor="middle">{t:.0}s</text>"#,
            axis_y + 18
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CompletionRecord;
    use compact_str::CompactString;

    fn completed(id: &str, start: f64, end: f64, gpus: &[&str]) -> CompletionRecord {
        CompletionRecord {
            task_id: CompactString::from(id),
            status: JobState::Completed,
            num_gpus: gpus.len() as u32,
            memory_per_gpu: 40.0,
            submission_time: 0.0,
            start_time: Some(start),
            completion_time: Some(end),
            estimated_duration: end - start,
            actual_duration: Some(end - start),
            jct: Some(end),
            wait_time: Some(start),
            allocated_gpus: gpus.iter().map(|g| CompactString::from(*g)).collect(),
        }
    }

    #[test]
    fn test_gantt_renders_one_bar_per_gpu() {
        let records = vec![completed("t0", 0.0, 100.0, &["rack-0-0", "rack-0-1"])];
        let svg = render_gantt(&records, "first-fit");
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<title>t0:").count(), 2);
        assert!(svg.contains("rack-0-1"));
    }

    #[test]
    fn test_gantt_stacks_co_tenant_jobs_on_tracks() {
        let records = vec![
            completed("t0", 0.0, 100.0, &["rack-0-0"]),
            completed("t1", 50.0, 150.0, &["rack-0-0"]),
            completed("t2", 120.0, 200.0, &["rack-0-0"]),
        ];
        let bars: Vec<Bar> = records
            .iter()
            .map(|r| Bar {
                task_id: &r.task_id,
                start: r.start_time.unwrap(),
                end: r.completion_time.unwrap(),
            })
            .collect();

        let placed = assign_tracks(&bars);
        // t1 overlaps t0 and needs a second track; t2 starts after t0
        // ended and reuses the first.
        assert_eq!(placed[0].0, 0);
        assert_eq!(placed[1].0, 1);
        assert_eq!(placed[2].0, 0);
    }

    #[test]
    fn test_empty_inputs_render_placeholder() {
        let svg = render_gantt(&[], "pollux");
        assert!(svg.contains("no completed tasks"));
        let svg = render_utilization(&[], "pollux");
        assert!(svg.contains("no timeline samples"));
    }

    #[test]
    fn test_utilization_polyline() {
        let timeline = vec![
            TimelinePoint {
                time: 0.0,
                total_gpu_time: 0.0,
                cluster_utilization: 0.0,
                running_tasks: 0,
                pending_tasks: 1,
                completed_tasks: 0,
            },
            TimelinePoint {
                time: 60.0,
                total_gpu_time: 60.0,
                cluster_utilization: 0.5,
                running_tasks: 1,
                pending_tasks: 0,
                completed_tasks: 0,
            },
        ];
        let svg = render_utilization(&timeline, "best-fit");
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("100%"));
    }

    #[test]
    fn test_task_color_is_stable_and_pastel() {
        assert_eq!(task_color("task-1"), task_color("task-1"));
        assert_ne!(task_color("task-1"), task_color("task-2"));
        assert!(task_color("task-1").starts_with("rgb("));
    }
}
