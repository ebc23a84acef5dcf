mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecl_core::config::EclConfig;

use commands::ead::ScheduleArgs;
use commands::ecl::{RunArgs, StageArgs};
use commands::lgd::{LgdArgs, WorkoutArgs};
use commands::pd::{EstimateMatrixArgs, MacroAdjustArgs, TermStructureArgs};

/// IFRS 9 expected credit loss calculations
#[derive(Parser)]
#[command(
    name = "ecl",
    version,
    about = "IFRS 9 expected credit loss calculations",
    long_about = "A CLI for IFRS 9 impairment with decimal precision. Estimates \
                  transition matrices, builds PD term structures, applies \
                  macroeconomic scenarios, computes LGD and EAD, stages exposures \
                  and runs the full portfolio ECL."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// JSON/YAML run configuration; replaces the config embedded in the input
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate transition matrices from historical observations
    EstimateMatrix(EstimateMatrixArgs),
    /// Project a through-the-cycle PD term structure from a matrix
    TermStructure(TermStructureArgs),
    /// Condition a term structure on macroeconomic scenarios
    MacroAdjust(MacroAdjustArgs),
    /// Loss given default from collateral and cash recoveries
    Lgd(LgdArgs),
    /// Cure and recovery rates of a defaulted cohort
    WorkoutRates(WorkoutArgs),
    /// Exposure-at-default amortization schedule for one facility
    Schedule(ScheduleArgs),
    /// Staging decision for one exposure
    Stage(StageArgs),
    /// Full impairment run over a portfolio
    Run(RunArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn load_config(path: Option<&str>) -> Result<Option<EclConfig>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let config: EclConfig = input::file::read_document(path)?;
    config.validate()?;
    Ok(Some(config))
}

fn dispatch(
    command: Commands,
    config: Option<&EclConfig>,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    match command {
        Commands::EstimateMatrix(args) => commands::pd::run_estimate_matrix(args, config),
        Commands::TermStructure(args) => commands::pd::run_term_structure(args),
        Commands::MacroAdjust(args) => commands::pd::run_macro_adjust(args, config),
        Commands::Lgd(args) => commands::lgd::run_lgd(args, config),
        Commands::WorkoutRates(args) => commands::lgd::run_workout(args),
        Commands::Schedule(args) => commands::ead::run_schedule(args, config),
        Commands::Stage(args) => commands::ecl::run_stage(args, config),
        Commands::Run(args) => commands::ecl::run_impairment(args, config),
        Commands::Version => Ok(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("ecl {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    init_tracing(cli.verbose);

    let result = load_config(cli.config.as_deref())
        .and_then(|config| dispatch(cli.command, config.as_ref()));

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
