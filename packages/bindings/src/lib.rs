use napi::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;

use ecl_core::ead::{EadConfig, FacilityTerms};
use ecl_core::ecl::{Stage, StagingObservation, StagingRules};
use ecl_core::lgd::workout::DEFAULT_WORKOUT_HORIZON;
use ecl_core::lgd::{CollateralProfile, LgdConfig, ResolutionBalances};
use ecl_core::pd::estimation::{EstimationConfig, Observation};
use ecl_core::pd::macro_adjustment::{MacroConfig, MacroScenario};
use ecl_core::pd::{StateSpace, TermStructure, TransitionMatrix};
use ecl_core::Frequency;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

fn parse<T: for<'de> Deserialize<'de>>(input_json: &str) -> NapiResult<T> {
    serde_json::from_str(input_json).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Probability of default
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EstimateMatrixRequest {
    observations: Vec<Observation>,
    state_space: StateSpace,
    as_of: chrono::NaiveDate,
    #[serde(default)]
    config: EstimationConfig,
}

#[napi]
pub fn estimate_transition_matrices(input_json: String) -> NapiResult<String> {
    let req: EstimateMatrixRequest = parse(&input_json)?;
    let output = ecl_core::pd::estimation::estimate_transition_matrices(
        &req.observations,
        &req.state_space,
        req.as_of,
        &req.config,
    )
    .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
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

#[napi]
pub fn pd_term_structure(input_json: String) -> NapiResult<String> {
    let req: TermStructureRequest = parse(&input_json)?;
    let horizon = req
        .horizon
        .unwrap_or_else(|| req.frequency.twelve_month_periods());
    let generator =
        ecl_core::pd::TermStructureGenerator::new(req.matrix, req.state_space, req.frequency)
            .map_err(to_napi_error)?;
    serde_json::to_string(&generator.generate(horizon)).map_err(to_napi_error)
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

#[napi]
pub fn macro_adjust(input_json: String) -> NapiResult<String> {
    let req: MacroAdjustRequest = parse(&input_json)?;
    let output = ecl_core::pd::macro_adjustment::adjust_term_structure(
        &req.term_structure,
        &req.matrix,
        &req.state_space,
        &req.scenarios,
        &req.config,
    )
    .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Loss given default
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LgdRequest {
    profile: CollateralProfile,
    exposure_at_default: ecl_core::Money,
    #[serde(default)]
    config: LgdConfig,
}

#[napi]
pub fn calculate_lgd(input_json: String) -> NapiResult<String> {
    let req: LgdRequest = parse(&input_json)?;
    let output = ecl_core::lgd::compute_lgd(&req.profile, req.exposure_at_default, &req.config)
        .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[derive(Deserialize)]
struct WorkoutRequest {
    balances: ResolutionBalances,
    #[serde(default)]
    horizon: Option<u32>,
}

#[napi]
pub fn workout_rates(input_json: String) -> NapiResult<String> {
    let req: WorkoutRequest = parse(&input_json)?;
    let horizon = req.horizon.unwrap_or(DEFAULT_WORKOUT_HORIZON);
    let output = ecl_core::lgd::workout_rates(&req.balances, horizon).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Exposure at default
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ScheduleRequest {
    facility: FacilityTerms,
    #[serde(default)]
    config: EadConfig,
}

#[napi]
pub fn amortization_schedule(input_json: String) -> NapiResult<String> {
    let req: ScheduleRequest = parse(&input_json)?;
    let output =
        ecl_core::ead::build_schedule(&req.facility, &req.config).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Staging and ECL
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StageRequest {
    #[serde(default)]
    previous_stage: Option<Stage>,
    observation: StagingObservation,
    #[serde(default)]
    rules: StagingRules,
}

#[napi]
pub fn assign_stage(input_json: String) -> NapiResult<String> {
    let req: StageRequest = parse(&input_json)?;
    let stage = ecl_core::ecl::next_stage(req.previous_stage, &req.observation, &req.rules);
    serde_json::to_string(&stage).map_err(to_napi_error)
}

#[napi]
pub fn run_impairment(input_json: String) -> NapiResult<String> {
    let input: ecl_core::ecl::ImpairmentInput = parse(&input_json)?;
    let output = ecl_core::ecl::run_impairment(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
