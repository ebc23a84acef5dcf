//! Per-exposure ECL evaluation and portfolio aggregation.
//!
//! Covers:
//! 1. **Discounted ECL** -- sum over p of marginal PD(p) x EAD(p) x LGD x DF(p).
//! 2. **Horizon selection** -- 12-month ECL for Stage 1, lifetime otherwise.
//! 3. **Exceptions** -- exposures with missing parameters or divergent
//!    schedules are excluded from totals and listed individually.
//! 4. **Parallel evaluation** -- exposures are independent; evaluated with
//!    rayon against a read-only context, cancellable between exposures.

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::config::DiscountRateSource;
use crate::ead::{
    build_schedule, periods_to_maturity, BalanceSheetTreatment, FacilityTerms, RepaymentProfile,
};
use crate::ecl::context::EclContext;
use crate::ecl::staging::{next_stage, Stage, StagingObservation};
use crate::error::{scope_to_exposure, EclError};
use crate::lgd::{compute_lgd, CollateralProfile};
use crate::time_value::{discount_factors, periodic_rate};
use crate::types::{Frequency, Money, Probability, Rate};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// A loan or facility on the valuation date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exposure {
    pub id: String,
    pub segment: String,
    /// Drawn balance.
    pub outstanding: Money,
    /// Annual contractual rate.
    pub annual_rate: Rate,
    /// Annual effective interest rate used for discounting, if different.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_interest_rate: Option<Rate>,
    #[serde(default)]
    pub frequency: Frequency,
    /// Remaining contractual periods. Derived from `maturity_date` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_periods: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity_date: Option<NaiveDate>,
    pub repayment: RepaymentProfile,
    #[serde(default)]
    pub treatment: BalanceSheetTreatment,
    pub current_state: String,
    pub origination_state: String,
    #[serde(default)]
    pub days_past_due: u32,
    /// Stage at the previous valuation date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<Stage>,
    /// Exposure-level recovery assumptions overriding the segment LGD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral: Option<CollateralProfile>,
}

impl Exposure {
    /// Remaining periods, from the explicit count or the maturity date.
    /// A matured exposure or one maturing before `valuation_date` is an
    /// exposure-level error.
    pub fn remaining_periods_at(&self, valuation_date: NaiveDate) -> EclResult<u32> {
        let periods = match (self.remaining_periods, self.maturity_date) {
            (Some(n), _) => n,
            (None, Some(maturity)) => periods_to_maturity(valuation_date, maturity, self.frequency)
                .map_err(|e| EclError::InvalidExposure {
                    exposure_id: self.id.clone(),
                    reason: match e {
                        EclError::InvalidInput { reason, .. } => {
                            format!("maturity date {maturity}: {reason}")
                        }
                        other => other.to_string(),
                    },
                })?,
            (None, None) => {
                return Err(EclError::MissingParameter {
                    exposure_id: self.id.clone(),
                    parameter: "remaining tenor".into(),
                })
            }
        };
        if periods == 0 {
            return Err(EclError::InvalidExposure {
                exposure_id: self.id.clone(),
                reason: format!("no remaining periods at {valuation_date}"),
            });
        }
        Ok(periods)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EclHorizon {
    TwelveMonth,
    Lifetime,
}

/// ECL for one exposure. Produced once per valuation date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureEcl {
    pub exposure_id: String,
    pub segment: String,
    pub stage: Stage,
    pub horizon: EclHorizon,
    /// Periods summed for the selected ECL.
    pub horizon_periods: u32,
    pub pd_12m: Probability,
    pub pd_lifetime: Probability,
    pub lgd: Rate,
    /// Exposure in the first period.
    pub ead: Money,
    pub ecl_12m: Money,
    pub ecl_lifetime: Money,
    /// 12-month ECL for Stage 1, lifetime ECL otherwise.
    pub ecl: Money,
}

/// An exposure excluded from the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EclException {
    pub exposure_id: String,
    pub segment: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EclTotals {
    pub count: usize,
    pub exposure: Money,
    pub ecl: Money,
    pub coverage_ratio: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EclRunOutput {
    pub valuation_date: NaiveDate,
    pub exposures: Vec<ExposureEcl>,
    pub exceptions: Vec<EclException>,
    pub total: EclTotals,
    /// Keyed by stage number 1..=3.
    pub by_stage: BTreeMap<u8, EclTotals>,
    pub by_segment: BTreeMap<String, EclTotals>,
}

// ---------------------------------------------------------------------------
// Core functions
// ---------------------------------------------------------------------------

/// Evaluate a single exposure against the shared context.
pub fn evaluate_exposure(ctx: &EclContext, exposure: &Exposure) -> EclResult<ExposureEcl> {
    let missing = |parameter: String| EclError::MissingParameter {
        exposure_id: exposure.id.clone(),
        parameter,
    };

    let segment = ctx
        .segment(&exposure.segment)
        .ok_or_else(|| missing(format!("pd term structure for segment '{}'", exposure.segment)))?;
    let term_structure = segment.term_structure(exposure.frequency).ok_or_else(|| {
        missing(format!(
            "pd term structure at {} frequency for segment '{}'",
            exposure.frequency, exposure.segment
        ))
    })?;
    let space = segment.state_space.as_ref();
    let current = space
        .state(&exposure.current_state)
        .ok_or_else(|| missing(format!("credit state '{}'", exposure.current_state)))?;
    let origination = space
        .state(&exposure.origination_state)
        .ok_or_else(|| missing(format!("credit state '{}'", exposure.origination_state)))?;

    let tenor = exposure.remaining_periods_at(ctx.valuation_date)?;

    let scoped = scope_to_exposure(&exposure.id);
    let config = ctx.config.as_ref();
    let schedule = build_schedule(
        &FacilityTerms {
            id: exposure.id.clone(),
            outstanding: exposure.outstanding,
            annual_rate: exposure.annual_rate,
            frequency: exposure.frequency,
            remaining_periods: tenor,
            repayment: exposure.repayment.clone(),
            treatment: exposure.treatment.clone(),
        },
        &config.ead,
    )
    .map_err(&scoped)?;
    let ead = schedule.exposure_at(1).unwrap_or(Decimal::ZERO);

    let lgd = match &exposure.collateral {
        Some(profile) => compute_lgd(profile, ead, &config.lgd).map_err(&scoped)?.lgd,
        None => segment
            .lgd
            .ok_or_else(|| missing(format!("lgd for segment '{}'", exposure.segment)))?,
    };

    // A delinquency bucket riskier than the reported state takes precedence
    let bucket = space
        .state_for_dpd(exposure.days_past_due)
        .filter(|b| b.rank > current.rank);
    let stage = next_stage(
        exposure.previous_stage,
        &StagingObservation {
            current_rank: bucket.map_or(current.rank, |b| b.rank),
            origination_rank: origination.rank,
            days_past_due: exposure.days_past_due,
            in_default: current.default || bucket.is_some_and(|b| b.default),
        },
        &config.staging,
    );

    // Credit-impaired exposures are priced from a default state
    let pricing_state = if stage == Stage::Stage3 {
        [Some(current), bucket]
            .into_iter()
            .flatten()
            .find(|s| s.default)
            .or_else(|| space.states.iter().find(|s| s.default))
            .ok_or_else(|| missing("default state for a credit-impaired exposure".into()))?
    } else {
        bucket.unwrap_or(current)
    };

    let marginal = term_structure
        .marginal_pds(&pricing_state.id, tenor)
        .ok_or_else(|| {
            missing(format!(
                "pd horizon of {tenor} periods from state '{}'",
                pricing_state.id
            ))
        })?;

    let annual_discount = match &config.discount {
        DiscountRateSource::EffectiveInterestRate => exposure
            .effective_interest_rate
            .unwrap_or(exposure.annual_rate),
        DiscountRateSource::Flat { annual_rate } => *annual_rate,
    };
    let discount_rate =
        periodic_rate(annual_discount, exposure.frequency, config.ead.rate_convention)
            .map_err(&scoped)?;
    let factors = discount_factors(discount_rate, tenor).map_err(&scoped)?;

    let twelve_month = exposure.frequency.twelve_month_periods().min(tenor);
    let mut ecl_12m = Decimal::ZERO;
    let mut ecl_lifetime = Decimal::ZERO;
    for (idx, ((pd, row), df)) in marginal
        .iter()
        .zip(schedule.rows.iter())
        .zip(factors.iter())
        .enumerate()
    {
        let loss = *pd * row.exposure * lgd * *df;
        ecl_lifetime += loss;
        if (idx as u32) < twelve_month {
            ecl_12m += loss;
        }
    }

    let (horizon, horizon_periods, ecl) = if stage.uses_lifetime() {
        (EclHorizon::Lifetime, tenor, ecl_lifetime)
    } else {
        (EclHorizon::TwelveMonth, twelve_month, ecl_12m)
    };

    Ok(ExposureEcl {
        exposure_id: exposure.id.clone(),
        segment: exposure.segment.clone(),
        stage,
        horizon,
        horizon_periods,
        pd_12m: term_structure
            .cumulative_pd(&pricing_state.id, twelve_month)
            .unwrap_or(Decimal::ZERO),
        pd_lifetime: term_structure
            .cumulative_pd(&pricing_state.id, tenor)
            .unwrap_or(Decimal::ZERO),
        lgd,
        ead,
        ecl_12m,
        ecl_lifetime,
        ecl,
    })
}

/// Evaluate every exposure in parallel and aggregate.
///
/// `cancel` is checked before each exposure; once set, no further exposures
/// start and the run returns `Cancelled` with no partial output.
pub fn run_ecl(
    ctx: &EclContext,
    exposures: &[Exposure],
    cancel: &AtomicBool,
) -> EclResult<EclRunOutput> {
    ctx.config.validate()?;
    let outcomes: Vec<Option<EclResult<ExposureEcl>>> = exposures
        .par_iter()
        .map(|exposure| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            Some(evaluate_exposure(ctx, exposure))
        })
        .collect();

    let completed = outcomes.iter().filter(|o| o.is_some()).count();
    if completed < exposures.len() || cancel.load(Ordering::Relaxed) {
        warn!(completed, total = exposures.len(), "ECL run cancelled");
        return Err(EclError::Cancelled { completed });
    }

    let mut results = Vec::with_capacity(exposures.len());
    let mut exceptions = Vec::new();
    for (exposure, outcome) in exposures.iter().zip(outcomes) {
        match outcome {
            Some(Ok(ecl)) => results.push(ecl),
            Some(Err(e)) if e.is_exposure_level() => {
                warn!(exposure = %exposure.id, kind = e.kind(), "exposure excluded: {e}");
                exceptions.push(EclException {
                    exposure_id: exposure.id.clone(),
                    segment: exposure.segment.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
            Some(Err(e)) => return Err(e),
            None => return Err(EclError::Cancelled { completed }),
        }
    }

    let output = aggregate(ctx.valuation_date, results, exceptions);
    info!(
        exposures = output.exposures.len(),
        exceptions = output.exceptions.len(),
        total_ecl = %output.total.ecl,
        "ECL run complete"
    );
    Ok(output)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn add_to(totals: &mut EclTotals, result: &ExposureEcl) {
    totals.count += 1;
    totals.exposure += result.ead;
    totals.ecl += result.ecl;
}

fn finish(totals: &mut EclTotals) {
    totals.coverage_ratio = if totals.exposure > Decimal::ZERO {
        totals.ecl / totals.exposure
    } else {
        Decimal::ZERO
    };
}

fn aggregate(
    valuation_date: NaiveDate,
    exposures: Vec<ExposureEcl>,
    exceptions: Vec<EclException>,
) -> EclRunOutput {
    let mut total = EclTotals::default();
    let mut by_stage: BTreeMap<u8, EclTotals> = BTreeMap::new();
    let mut by_segment: BTreeMap<String, EclTotals> = BTreeMap::new();

    for result in &exposures {
        add_to(&mut total, result);
        add_to(by_stage.entry(result.stage.number()).or_default(), result);
        add_to(by_segment.entry(result.segment.clone()).or_default(), result);
    }

    finish(&mut total);
    by_stage.values_mut().for_each(finish);
    by_segment.values_mut().for_each(finish);

    EclRunOutput {
        valuation_date,
        exposures,
        exceptions,
        total,
        by_stage,
        by_segment,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
