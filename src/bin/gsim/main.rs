use clap::Parser;
use cli::Gsim;

mod cli;
mod commands;

fn main() {
    let gsim = Gsim::parse();

    tracing_subscriber::fmt()
        .with_max_level(gsim.verbose.tracing_level_filter())
        .with_target(false)
        .init();

    tracing::debug!(?gsim, "starting gsim");

    if let Err(err) = commands::handle(gsim) {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}
