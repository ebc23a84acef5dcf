//! End-to-end impairment run.
//!
//! observations -> per-segment matrices -> TTC term structures -> macro
//! adjustment -> segment LGD -> context -> parallel exposure evaluation.
//! Matrix and calibration failures abort the run and name the offending
//! states. A segment whose history is too sparse to estimate is excluded
//! on its own, unless every segment is; per-exposure failures land in the
//! exceptions list.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::EclConfig;
use crate::ecl::context::{EclContext, SegmentParameters};
use crate::ecl::engine::{run_ecl, EclException, EclRunOutput, Exposure};
use crate::lgd::{compute_lgd, CollateralProfile, LgdBreakdown};
use crate::pd::estimation::{estimate_transition_matrices, EstimatedMatrix, Observation};
use crate::pd::macro_adjustment::{adjust_term_structure, AdjustedTermStructure, MacroScenario};
use crate::pd::{StateSpace, TermStructureGenerator};
use crate::types::{with_metadata, ComputationOutput, Frequency};
use crate::error::EclError;
use crate::EclResult;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpairmentInput {
    pub valuation_date: NaiveDate,
    pub state_space: StateSpace,
    /// Historical transitions. Records without a segment apply to every segment.
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub scenarios: Vec<MacroScenario>,
    /// Recovery assumptions, one per segment.
    #[serde(default)]
    pub collateral: Vec<CollateralProfile>,
    pub exposures: Vec<Exposure>,
    #[serde(default)]
    pub config: EclConfig,
}

/// PD artefacts for one segment at one frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPd {
    pub segment: String,
    pub frequency: Frequency,
    pub estimated: EstimatedMatrix,
    pub term_structure: AdjustedTermStructure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpairmentOutput {
    pub run: EclRunOutput,
    pub pd: Vec<SegmentPd>,
    pub lgd: Vec<LgdBreakdown>,
}

// ---------------------------------------------------------------------------
// Core functions
// ---------------------------------------------------------------------------

pub fn run_impairment(input: &ImpairmentInput) -> EclResult<ComputationOutput<ImpairmentOutput>> {
    run_impairment_with_cancel(input, &AtomicBool::new(false))
}

pub fn run_impairment_with_cancel(
    input: &ImpairmentInput,
    cancel: &AtomicBool,
) -> EclResult<ComputationOutput<ImpairmentOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let config = &input.config;
    config.validate()?;
    input.state_space.validate()?;

    let segments: BTreeSet<&str> = input.exposures.iter().map(|e| e.segment.as_str()).collect();
    let segment_count = segments.len();
    let mut failed: BTreeMap<&str, EclError> = BTreeMap::new();

    if input.scenarios.is_empty() {
        warnings.push("No macro scenarios supplied; through-the-cycle PDs used unadjusted".into());
    }

    let mut context = EclContext::new(input.valuation_date, config.clone());
    let mut pd = Vec::new();
    let mut lgd = Vec::new();

    for segment in segments {
        let history: Vec<Observation> = input
            .observations
            .iter()
            .filter(|o| o.segment.as_deref().map_or(true, |s| s == segment))
            .cloned()
            .collect();
        let matrices = match estimate_transition_matrices(
            &history,
            &input.state_space,
            input.valuation_date,
            &config.estimation,
        ) {
            Ok(matrices) => matrices,
            Err(e @ EclError::InsufficientData { .. }) => {
                warn!(segment, "segment excluded: {e}");
                warnings.push(format!("Segment '{segment}' excluded: {e}"));
                failed.insert(segment, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let segment_exposures: Vec<&Exposure> =
            input.exposures.iter().filter(|e| e.segment == segment).collect();

        let segment_lgd = match input.collateral.iter().find(|c| c.segment == segment) {
            Some(profile) => {
                let ead = segment_exposures.iter().map(|e| e.outstanding).sum();
                let breakdown = compute_lgd(profile, ead, &config.lgd)?;
                let value = breakdown.lgd;
                lgd.push(breakdown);
                Some(value)
            }
            None => {
                warnings.push(format!(
                    "Segment '{segment}' has no recovery assumptions; exposures without collateral are excluded"
                ));
                None
            }
        };

        let mut parameters = SegmentParameters::new(input.state_space.clone(), segment_lgd);
        for estimated in matrices {
            if !estimated.fallback_rows.is_empty() {
                warnings.push(format!(
                    "Segment '{segment}' ({}): rows [{}] filled by fallback policy",
                    estimated.frequency,
                    estimated.fallback_rows.join(", ")
                ));
            }
            if !estimated.quality.is_monotone {
                warnings.push(format!(
                    "Segment '{segment}' ({}): default rates are not monotone in state rank",
                    estimated.frequency
                ));
            }

            let horizon = segment_exposures
                .iter()
                .filter(|e| e.frequency == estimated.frequency)
                .filter_map(|e| e.remaining_periods_at(input.valuation_date).ok())
                .max()
                .unwrap_or(0)
                .max(estimated.frequency.twelve_month_periods());

            let generator = TermStructureGenerator::new(
                estimated.matrix.clone(),
                input.state_space.clone(),
                estimated.frequency,
            )?;
            let ttc = generator.generate(horizon);
            let adjusted = if input.scenarios.is_empty() {
                AdjustedTermStructure {
                    through_the_cycle: ttc.clone(),
                    point_in_time: ttc,
                    scenarios: Vec::new(),
                }
            } else {
                adjust_term_structure(
                    &ttc,
                    &estimated.matrix,
                    &input.state_space,
                    &input.scenarios,
                    &config.macro_adjustment,
                )?
            };

            parameters = parameters.with_term_structure(adjusted.point_in_time.clone());
            pd.push(SegmentPd {
                segment: segment.to_string(),
                frequency: estimated.frequency,
                estimated,
                term_structure: adjusted,
            });
        }
        context = context.with_segment(segment, parameters);
    }

    if failed.len() == segment_count {
        if let Some((_, e)) = failed.pop_first() {
            return Err(e);
        }
    }

    let mut run = if failed.is_empty() {
        run_ecl(&context, &input.exposures, cancel)?
    } else {
        let priced: Vec<Exposure> = input
            .exposures
            .iter()
            .filter(|e| !failed.contains_key(e.segment.as_str()))
            .cloned()
            .collect();
        run_ecl(&context, &priced, cancel)?
    };
    for exposure in &input.exposures {
        if let Some(e) = failed.get(exposure.segment.as_str()) {
            run.exceptions.push(EclException {
                exposure_id: exposure.id.clone(),
                segment: exposure.segment.clone(),
                kind: e.kind().to_string(),
                message: e.to_string(),
            });
        }
    }
    if !run.exceptions.is_empty() {
        warn!(count = run.exceptions.len(), "exposures excluded from aggregate");
        warnings.push(format!(
            "{} exposure(s) excluded from totals; see exceptions",
            run.exceptions.len()
        ));
    }
    info!(
        segments = context.segments().count(),
        total_ecl = %run.total.ecl,
        coverage = %run.total.coverage_ratio,
        "impairment run complete"
    );

    let assumptions = serde_json::json!({
        "valuation_date": input.valuation_date,
        "lookback_months": config.estimation.lookback_months,
        "frequencies": config.estimation.frequencies,
        "asset_correlation": config.macro_adjustment.asset_correlation.to_string(),
        "scenarios": input.scenarios.iter().map(|s| (s.name.clone(), s.weight.to_string())).collect::<Vec<_>>(),
        "staging": config.staging,
        "discount": config.discount,
        "exposures": input.exposures.len(),
        "total_outstanding": input.exposures.iter().map(|e| e.outstanding).sum::<Decimal>().to_string(),
    });

    let output = ImpairmentOutput { run, pd, lgd };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "IFRS 9 ECL: transition-matrix PD, single-factor macro adjustment, collateral LGD, amortizing EAD",
        &assumptions,
        warnings,
        elapsed,
        output,
    ))
}
