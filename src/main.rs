use std::process::ExitCode;

use clap::{Parser, Subcommand};
use scstats::command;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate, per cell barcode, how many reads a set of filters would remove
    FilterStats(command::FilterStatsCMD),
    /// Per-cell enrichment diagnostic: Jensen-Shannon distance vs a synthetic Poisson cell
    Jsd(command::JsdCMD),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::FilterStats(mut cmd) => cmd.try_execute(),
        Commands::Jsd(mut cmd) => cmd.try_execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
