//! Cambrian CLI - evolve programs for the built-in benchmark problems.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use cambrian::problems::RunConfig;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Cambrian - genetic programming over typed program graphs
#[derive(Parser, Debug)]
#[command(name = "cambrian")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every benchmark.
#[derive(ClapArgs, Debug)]
struct CommonArgs {
    /// Population size (per sub-population for the duel)
    #[arg(short, long, default_value = "5")]
    popn: usize,

    /// Generation budget
    #[arg(short = 'g', long, default_value = "1000")]
    gens: usize,

    /// Terminate early at this fitness
    #[arg(short, long)]
    target: Option<f64>,

    /// Random seed
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Progress stride in generations
    #[arg(long, default_value = "10")]
    progress_every: usize,

    /// Write a final snapshot to this path
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl CommonArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            popn: self.popn,
            n_gens: self.gens,
            target: self.target.unwrap_or(f64::INFINITY),
            seed: self.seed,
            progress_every: self.progress_every,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Circle classification over a 9x9 grid for radii 1-4
    Circle {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Even-k-parity from and/or/nand/nor
    Parity {
        /// Number of boolean inputs
        #[arg(short, long, default_value = "3")]
        k: usize,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Santa-Fe-style ant trail
    Ant {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Generator-vs-discriminator randomness duel
    Duel {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let result = match args.command {
        Commands::Circle { common } => cli::run_circle(&common.run_config(), common.snapshot),
        Commands::Parity { k, common } => {
            cli::run_parity(k, &common.run_config(), common.snapshot)
        }
        Commands::Ant { common } => cli::run_ant(&common.run_config(), common.snapshot),
        Commands::Duel { common } => cli::run_duel(&common.run_config(), common.snapshot),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
