use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use ecl_core::config::EclConfig;
use ecl_core::ecl::staging::is_sicr;
use ecl_core::ecl::{self, next_stage, ImpairmentInput, Stage, StagingObservation, StagingRules};
use ecl_core::with_metadata;

use crate::input;

/// Arguments for a single staging decision
#[derive(Args)]
pub struct StageArgs {
    /// Path to JSON/YAML input file (observation, previous_stage)
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for a full impairment run
#[derive(Args)]
pub struct RunArgs {
    /// Path to JSON/YAML input file (state_space, observations, scenarios, collateral, exposures)
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Deserialize)]
struct StageRequest {
    #[serde(default)]
    previous_stage: Option<Stage>,
    observation: StagingObservation,
    #[serde(default)]
    rules: StagingRules,
}

pub fn run_stage(
    args: StageArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut request: StageRequest = input::load(args.input.as_deref(), "stage")?;
    if let Some(cfg) = config {
        request.rules = cfg.staging.clone();
    }

    let stage = next_stage(request.previous_stage, &request.observation, &request.rules);
    let result = serde_json::json!({
        "stage": stage,
        "stage_number": stage.number(),
        "significant_increase": is_sicr(&request.observation, &request.rules),
        "lifetime_horizon": stage.uses_lifetime(),
    });

    let output = with_metadata(
        "Rank-deterioration SICR with days-past-due backstop and cure probation",
        &request.rules,
        Vec::new(),
        start.elapsed().as_micros() as u64,
        result,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_impairment(
    args: RunArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request: ImpairmentInput = input::load(args.input.as_deref(), "run")?;
    if let Some(cfg) = config {
        request.config = cfg.clone();
    }
    let output = ecl::run_impairment(&request)?;
    Ok(serde_json::to_value(output)?)
}
