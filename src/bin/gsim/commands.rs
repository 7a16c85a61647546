use crate::cli::{Commands, Gsim};
use anyhow::{Context, Result};
use clap::CommandFactory;
use gsim::config::{load_config, Config};
use gsim::core::{Cluster, Job};
use gsim::metrics::{self, Metrics, Summary};
use gsim::plot;
use gsim::sched::PolicyKind;
use gsim::simulator::{SharingModel, Simulator};
use gsim::workload::{load_workload, WorkloadGenerator};
use owo_colors::OwoColorize;

pub fn handle(cli: Gsim) -> Result<()> {
    if let Some(Commands::Completions(args)) = &cli.command {
        let mut command = Gsim::command();
        clap_complete::generate(args.shell, &mut command, "gsim", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = load_config(cli.config.as_ref()).context("loading configuration")?;
    if let Some(output_dir) = &cli.output_dir {
        config.experiment.output_dir = output_dir.clone();
    }
    if let Some(seed) = cli.seed {
        config.experiment.seed = seed;
    }
    config.validate()?;

    let workload = match &cli.workload {
        Some(path) => load_workload(path)?,
        None => WorkloadGenerator::new(config.experiment.seed).generate(&config.workload),
    };

    println!(
        "{} {} racks x {} GPUs, {} GB each; {} tasks",
        "Experiment:".bold(),
        config.cluster.num_racks,
        config.cluster.gpus_per_rack,
        config.cluster.gpu_memory_gb,
        workload.len()
    );

    let kinds: Vec<PolicyKind> = if cli.run_all {
        PolicyKind::ALL.to_vec()
    } else {
        vec![cli.scheduler]
    };

    let mut summaries = Vec::with_capacity(kinds.len());
    for kind in &kinds {
        let summary = run_one(*kind, &config, workload.clone(), &cli)?;
        summaries.push(summary);
    }

    if cli.run_all {
        metrics::write_comparison(&config.experiment.output_dir, &summaries)?;
        print_comparison(&summaries);
    }

    Ok(())
}

fn run_one(kind: PolicyKind, config: &Config, workload: Vec<Job>, cli: &Gsim) -> Result<Summary> {
    println!("\n{} {}", "Running scheduler:".bold(), kind.to_string().cyan());

    match kind {
        PolicyKind::MinGpuTime => {
            config.validate_patience(config.scheduler.min_gpu_time.starvation_limit)?
        }
        PolicyKind::PolluxPatient => {
            config.validate_patience(config.scheduler.pollux.starvation_limit)?
        }
        _ => {}
    }

    let cluster = Cluster::from_config(&config.cluster)?;
    let sharing = SharingModel::from_config(&config.simulator);
    let policy = kind.build(&config.scheduler, &sharing);
    let mut simulator = Simulator::new(cluster, policy, config.simulator.clone());
    let mut metrics = Metrics::new(sharing.interpretation());

    simulator.run(workload, &mut metrics);

    let scheduler = kind.to_string();
    metrics.print_summary(&scheduler);
    if !cli.run_all {
        metrics.print_task_table();
    }

    metrics.save_tables(&config.experiment.output_dir, &scheduler, kind.tag())?;
    if cli.plot {
        plot::save_plots(&metrics, &config.experiment.output_dir, kind.tag())?;
    }

    Ok(metrics.summary(&scheduler))
}

fn print_comparison(summaries: &[Summary]) {
    println!("\n{}", "Scheduler comparison".bold());
    for summary in summaries {
        let jct = summary
            .average_jct
            .map_or_else(|| "N/A".to_string(), |v| format!("{v:.2}"));
        println!(
            "  {:<16} completed {:>3}/{:<3} starved {:>3}  avg JCT {:>10}s  GPU time {:>12.2}s",
            summary.scheduler,
            summary.completed_tasks,
            summary.total_tasks,
            summary.starved_tasks,
            jct,
            summary.total_gpu_time,
        );
    }
}
