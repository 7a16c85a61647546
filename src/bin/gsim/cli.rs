use clap::Parser;
use clap_complete::Shell;
use gsim::sched::PolicyKind;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "gsim",
    author,
    version,
    about = "A discrete-event GPU cluster scheduling simulator."
)]
pub struct Gsim {
    /// Scheduling policy to simulate
    #[clap(short, long, value_enum, default_value_t = PolicyKind::MinGpuTime)]
    pub scheduler: PolicyKind,

    /// Run every scheduling policy on the same workload and write a
    /// comparison table
    #[clap(long, conflicts_with = "scheduler")]
    pub run_all: bool,

    /// Render Gantt and utilization SVGs next to the CSV artifacts
    #[clap(long)]
    pub plot: bool,

    /// Path to a TOML config file (defaults layer under it)
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Replay a workload CSV instead of generating one
    #[clap(short, long, name = "CSV")]
    pub workload: Option<PathBuf>,

    /// Directory for result artifacts (overrides the config)
    #[clap(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Workload generator seed (overrides the config)
    #[clap(long)]
    pub seed: Option<u64>,

    /// Sub Commands
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Generate tab-completion scripts for your shell
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// The shell to generate the completions for
    pub shell: Shell,
}
