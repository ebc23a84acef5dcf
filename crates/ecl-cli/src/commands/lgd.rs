use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use ecl_core::config::EclConfig;
use ecl_core::lgd::workout::DEFAULT_WORKOUT_HORIZON;
use ecl_core::lgd::{compute_lgd, workout_rates, CollateralProfile, LgdConfig, ResolutionBalances};
use ecl_core::{with_metadata, Money};

use crate::input;

/// Arguments for collateral-based LGD
#[derive(Args)]
pub struct LgdArgs {
    /// Path to JSON/YAML input file (profile, exposure_at_default)
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for workout cure/recovery rates
#[derive(Args)]
pub struct WorkoutArgs {
    /// Path to JSON/YAML input file (balances)
    #[arg(long)]
    pub input: Option<String>,

    /// Number of periods to project
    #[arg(long)]
    pub horizon: Option<u32>,
}

#[derive(Deserialize)]
struct LgdRequest {
    profile: CollateralProfile,
    exposure_at_default: Money,
    #[serde(default)]
    config: LgdConfig,
}

#[derive(Deserialize)]
struct WorkoutRequest {
    balances: ResolutionBalances,
    #[serde(default)]
    horizon: Option<u32>,
}

pub fn run_lgd(
    args: LgdArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut request: LgdRequest = input::load(args.input.as_deref(), "lgd")?;
    if let Some(cfg) = config {
        request.config = cfg.lgd.clone();
    }

    let breakdown = compute_lgd(&request.profile, request.exposure_at_default, &request.config)?;
    let mut warnings = Vec::new();
    if !breakdown.secured {
        warnings.push(format!(
            "No collateral for segment '{}'; unsecured recovery rate applied",
            breakdown.segment
        ));
    }

    let output = with_metadata(
        "Discounted collateral and cash recovery, adjusted for cures",
        &request.config,
        warnings,
        start.elapsed().as_micros() as u64,
        breakdown,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_workout(args: WorkoutArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let request: WorkoutRequest = input::load(args.input.as_deref(), "workout-rates")?;
    let horizon = args
        .horizon
        .or(request.horizon)
        .unwrap_or(DEFAULT_WORKOUT_HORIZON);

    let rates = workout_rates(&request.balances, horizon)?;

    let output = with_metadata(
        "Default-state workout: cure and recovery as competing absorbing outcomes",
        &serde_json::json!({ "horizon": horizon }),
        Vec::new(),
        start.elapsed().as_micros() as u64,
        rates,
    );
    Ok(serde_json::to_value(output)?)
}
