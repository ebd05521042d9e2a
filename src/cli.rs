//! CLI command implementations for the benchmark problems.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use cambrian::coevolve::CoSummary;
use cambrian::dot::program_text;
use cambrian::evolve::{Individual, Summary};
use cambrian::genome::Genotype;
use cambrian::problems::{ant, circle, duel, parity, RunConfig};
use cambrian::snapshot::{save_snapshot, Snapshot};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

/// CLI error type.
#[derive(Debug)]
pub(crate) struct CliError {
    message: String,
}

impl CliError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        CliError {
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for CliError {}

impl From<cambrian::Error> for CliError {
    fn from(e: cambrian::Error) -> Self {
        CliError::new(e.to_string())
    }
}

fn progress_bar(n_gens: usize) -> ProgressBar {
    let bar = ProgressBar::new(n_gens as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} gen {pos}/{len} {msg}")
            .expect("valid progress template"),
    );
    bar
}

fn report_champion<G: Genotype>(best: Option<&Individual<G>>) {
    let Some(best) = best else {
        println!("no champion produced");
        return;
    };
    let mut genome = best.genome.clone();
    println!("best fitness: {:.4}", best.fitness_or_zero());
    match genome.program() {
        Ok(program) => {
            println!("champion program:");
            print!("{}", program_text(&program));
        }
        Err(e) => eprintln!("warning: champion failed to compile: {e}"),
    }
}

fn write_snapshot<G, D>(path: &Path, popn: Vec<Individual<G>>, history: Vec<D>, gens: usize)
where
    G: Serialize,
    D: Serialize,
{
    let snapshot = Snapshot {
        generation: gens,
        popn,
        history,
    };
    if let Err(e) = save_snapshot(&snapshot, path) {
        eprintln!("warning: snapshot write failed: {e}");
    } else {
        println!("snapshot written to {}", path.display());
    }
}

/// Run the circle-classification benchmark.
pub(crate) fn run_circle(cfg: &RunConfig, snapshot: Option<PathBuf>) -> Result<(), CliError> {
    let bar = progress_bar(cfg.n_gens);
    let result = circle::run(cfg, |gen, _popn, history: &[Summary<_>]| {
        bar.set_position(gen as u64);
        if let Some(last) = history.last() {
            bar.set_message(format!("max {:.3}", last.max));
        }
    })?;
    bar.finish();
    println!("circle: {} generations", result.n_gens);
    report_champion(result.history.last().and_then(|s| s.best.as_ref()));
    if let Some(path) = snapshot {
        write_snapshot(&path, result.popn, result.history, result.n_gens);
    }
    Ok(())
}

/// Run the even-k-parity benchmark.
pub(crate) fn run_parity(
    k: usize,
    cfg: &RunConfig,
    snapshot: Option<PathBuf>,
) -> Result<(), CliError> {
    let bar = progress_bar(cfg.n_gens);
    let result = parity::run(k, cfg, |gen, _popn, history: &[Summary<_>]| {
        bar.set_position(gen as u64);
        if let Some(last) = history.last() {
            bar.set_message(format!("max {:.3}", last.max));
        }
    })?;
    bar.finish();
    println!("even-{k}-parity: {} generations", result.n_gens);
    report_champion(result.history.last().and_then(|s| s.best.as_ref()));
    if let Some(path) = snapshot {
        write_snapshot(&path, result.popn, result.history, result.n_gens);
    }
    Ok(())
}

/// Run the ant-trail benchmark.
pub(crate) fn run_ant(cfg: &RunConfig, snapshot: Option<PathBuf>) -> Result<(), CliError> {
    let bar = progress_bar(cfg.n_gens);
    let result = ant::run(cfg, |gen, _popn, history: &[Summary<_>]| {
        bar.set_position(gen as u64);
        if let Some(last) = history.last() {
            bar.set_message(format!("eaten {:.0}", last.max));
        }
    })?;
    bar.finish();
    println!("ant trail: {} generations", result.n_gens);
    report_champion(result.history.last().and_then(|s| s.best.as_ref()));
    if let Some(path) = snapshot {
        write_snapshot(&path, result.popn, result.history, result.n_gens);
    }
    Ok(())
}

/// Run the randomness-duel benchmark.
pub(crate) fn run_duel(cfg: &RunConfig, snapshot: Option<PathBuf>) -> Result<(), CliError> {
    let bar = progress_bar(cfg.n_gens);
    let result = duel::run(cfg, |gen, summary: &CoSummary<_>| {
        bar.set_position(gen as u64);
        bar.set_message(format!(
            "gen {:.2} disc {:.2}",
            summary.a.max, summary.b.max
        ));
    })?;
    bar.finish();
    println!("randomness duel: {} generations", result.n_gens);
    if let Some(last) = result.history.last() {
        println!("generator side:");
        report_champion(last.a.best.as_ref());
        println!("discriminator side:");
        report_champion(last.b.best.as_ref());
    }
    if let Some(path) = snapshot {
        write_snapshot(&path, result.popn, result.history, result.n_gens);
    }
    Ok(())
}
