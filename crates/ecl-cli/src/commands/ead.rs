use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use ecl_core::config::EclConfig;
use ecl_core::ead::{build_schedule, EadConfig, FacilityTerms};
use ecl_core::with_metadata;

use crate::input;

/// Arguments for the EAD amortization schedule
#[derive(Args)]
pub struct ScheduleArgs {
    /// Path to JSON/YAML input file (facility)
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Deserialize)]
struct ScheduleRequest {
    facility: FacilityTerms,
    #[serde(default)]
    config: EadConfig,
}

pub fn run_schedule(
    args: ScheduleArgs,
    config: Option<&EclConfig>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut request: ScheduleRequest = input::load(args.input.as_deref(), "schedule")?;
    if let Some(cfg) = config {
        request.config = cfg.ead.clone();
    }

    let schedule = build_schedule(&request.facility, &request.config)?;
    let mut warnings = Vec::new();
    if !schedule.residual.is_zero() {
        warnings.push(format!(
            "Rounding residual of {} absorbed into the final period",
            schedule.residual
        ));
    }

    let output = with_metadata(
        "Contractual amortization with credit conversion for off-balance exposures",
        &request.config,
        warnings,
        start.elapsed().as_micros() as u64,
        schedule,
    );
    Ok(serde_json::to_value(output)?)
}
