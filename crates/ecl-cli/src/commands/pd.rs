use chrono::NaiveDate;
use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use ecl_core::config::EclConfig;
use ecl_core::pd::estimation::{estimate_transition_matrices, EstimationConfig, Observation};
use ecl_core::pd::macro_adjustment::{adjust_term_structure, MacroConfig, MacroScenario};
use ecl_core::pd::{StateSpace, TermStructure, TermStructureGenerator, TransitionMatrix};
use ecl_core::{with_metadata, Frequency};

use crate::input;

/// Arguments for transition matrix estimation
#[derive(Args)]
pub struct EstimateMatrixArgs {
    /// Path to JSON/YAML input file (observations, state_space, as_of)
    #[arg(long)]
    pub input: Option<String>,

    /// Override the lookback window in months
    #[arg(long)]
    pub lookback_months: Option<u32>,
}

/// Arguments for PD term structure generation
#[derive(Args)]
pub struct TermStructureArgs {
    /// Path to JSON/YAML input file (matrix, state_space, frequency)
    #[arg(long)]
    pub input: Option<String>,

    /// Number of periods to project (overrides the input)
    #[arg(long)]
    pub horizon: Option<u32>,
}

/// Arguments for the macro adjustment
#[derive(Args)]
pub struct MacroAdjustArgs {
    /// Path to JSON/YAML input file (term_structure, matrix, state_space, scenarios)
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Deserialize)]
struct EstimateMatrixRequest {
    observations: Vec<Observation>,
    state_space: StateSpace,
    as_of: NaiveDate,
    #[serde(default)]
    config: EstimationConfig,
}

#[derive(Deserialize)]
struct TermStructureRequest {
    matrix: TransitionMatrix,
    state_space: StateSpace,
    #[serde(default)]
    frequency: Frequency,
    #[serde(default)]
    horizon: Option<u32>,
}

#[derive(Deserialize)]
struct MacroAdjustRequest {
    term_structure: TermStructure,
    matrix: TransitionMatrix,
    state_space: StateSpace,
    scenarios: Vec<MacroScenario>,
    #[serde(default)]
    config: MacroConfig,
}

pub fn run_estimate_matrix(
    args: EstimateMatrixArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut request: EstimateMatrixRequest = input::load(args.input.as_deref(), "estimate-matrix")?;
    if let Some(cfg) = config {
        request.config = cfg.estimation.clone();
    }
    if let Some(months) = args.lookback_months {
        request.config.lookback_months = months;
    }

    let matrices = estimate_transition_matrices(
        &request.observations,
        &request.state_space,
        request.as_of,
        &request.config,
    )?;
    let warnings = matrices
        .iter()
        .filter(|m| !m.fallback_rows.is_empty())
        .map(|m| {
            format!(
                "{}: rows [{}] filled by fallback policy",
                m.frequency,
                m.fallback_rows.join(", ")
            )
        })
        .collect();

    let output = with_metadata(
        "Cohort transition matrix estimation",
        &request.config,
        warnings,
        start.elapsed().as_micros() as u64,
        matrices,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_term_structure(args: TermStructureArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let request: TermStructureRequest = input::load(args.input.as_deref(), "term-structure")?;
    let horizon = args
        .horizon
        .or(request.horizon)
        .unwrap_or_else(|| request.frequency.twelve_month_periods());

    let generator =
        TermStructureGenerator::new(request.matrix, request.state_space, request.frequency)?;
    let term_structure = generator.generate(horizon);

    let output = with_metadata(
        "Markov chain PD term structure (matrix powers)",
        &serde_json::json!({ "horizon": horizon, "frequency": request.frequency }),
        Vec::new(),
        start.elapsed().as_micros() as u64,
        term_structure,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_macro_adjust(
    args: MacroAdjustArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut request: MacroAdjustRequest = input::load(args.input.as_deref(), "macro-adjust")?;
    if let Some(cfg) = config {
        request.config = cfg.macro_adjustment.clone();
    }

    let adjusted = adjust_term_structure(
        &request.term_structure,
        &request.matrix,
        &request.state_space,
        &request.scenarios,
        &request.config,
    )?;

    let output = with_metadata(
        "Single-factor probit shift of conditional default rates, probability-weighted across scenarios",
        &request.config,
        Vec::new(),
        start.elapsed().as_micros() as u64,
        adjusted,
    );
    Ok(serde_json::to_value(output)?)
}
