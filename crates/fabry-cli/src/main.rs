mod commands;
mod progress;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fabry", about = "Fabry-Perot phase-map reduction tool")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cube container metadata
    Info(commands::info::InfoArgs),
    /// Run the phase-map pipeline on a cube
    Run(commands::run::RunArgs),
    /// Print or save the default pipeline config
    Config(commands::config::ConfigArgs),
    /// Write a synthetic Airy calibration cube
    Synth(commands::synth::SynthArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Config(args) => commands::config::run(args),
        Commands::Synth(args) => commands::synth::run(args),
    }
}
