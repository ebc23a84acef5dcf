//! Forward amortization schedules and exposure at default.
//!
//! Covers:
//! 1. **Amortizing** -- level payment, interest on opening balance.
//! 2. **Interest-only** -- interest each period, principal at maturity.
//! 3. **Bullet** -- interest accrues, principal plus accrued paid at maturity.
//! 4. **Balloon** -- level payment down to the balloon, balloon at maturity.
//! 5. **Custom** -- caller-supplied principal per period.
//! 6. **Off-balance-sheet** -- drawn balance plus CCF x undrawn commitment.
//!
//! The schedule is computed at full precision; the outstanding left after
//! the final regular payment must land within one minor unit of its target
//! (zero, or the balloon) and is then snapped exactly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EclError;
use crate::time_value::{annuity_payment, periodic_rate, tenor_in_months, RateConvention};
use crate::types::{Frequency, Money, Rate};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepaymentProfile {
    Amortizing,
    InterestOnly,
    Bullet,
    Balloon { amount: Money },
    Custom { principal: Vec<Money> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalanceSheetTreatment {
    #[default]
    OnBalance,
    /// Committed facility: `limit` is the total commitment.
    OffBalance {
        limit: Money,
        facility_class: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EadConfig {
    /// Credit conversion factor per facility class.
    pub ccf: BTreeMap<String, Rate>,
    /// Smallest currency unit; tolerance for schedule convergence.
    pub minor_unit: Money,
    pub rate_convention: RateConvention,
}

impl Default for EadConfig {
    fn default() -> Self {
        EadConfig {
            ccf: BTreeMap::new(),
            minor_unit: dec!(0.01),
            rate_convention: RateConvention::Effective,
        }
    }
}

impl EadConfig {
    pub fn validate(&self) -> EclResult<()> {
        if self.minor_unit <= Decimal::ZERO {
            return Err(EclError::InvalidInput {
                field: "minor_unit".into(),
                reason: "Minor unit must be positive".into(),
            });
        }
        for (class, ccf) in &self.ccf {
            if *ccf < Decimal::ZERO || *ccf > Decimal::ONE {
                return Err(EclError::InvalidInput {
                    field: format!("ccf.{class}"),
                    reason: format!("CCF must be in [0, 1], got {ccf}"),
                });
            }
        }
        Ok(())
    }
}

/// Contractual terms needed to project a balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityTerms {
    pub id: String,
    /// Drawn balance today.
    pub outstanding: Money,
    /// Annual contractual rate.
    pub annual_rate: Rate,
    #[serde(default)]
    pub frequency: Frequency,
    pub remaining_periods: u32,
    pub repayment: RepaymentProfile,
    #[serde(default)]
    pub treatment: BalanceSheetTreatment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationRow {
    pub period: u32,
    pub opening_balance: Money,
    pub payment: Money,
    pub interest: Money,
    pub principal: Money,
    pub outstanding: Money,
    /// Exposure at default if default occurs during this period.
    pub exposure: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub exposure_id: String,
    pub frequency: Frequency,
    pub periodic_rate: Rate,
    /// CCF applied to the undrawn commitment (off-balance-sheet only).
    pub ccf: Option<Rate>,
    pub rows: Vec<AmortizationRow>,
    /// Distance from the maturity target before snapping.
    pub residual: Money,
    pub total_interest: Money,
}

impl AmortizationSchedule {
    /// EAD for period `p` (1-based). None past maturity.
    pub fn exposure_at(&self, period: u32) -> Option<Money> {
        if period == 0 {
            return None;
        }
        self.rows.get(period as usize - 1).map(|r| r.exposure)
    }

    pub fn tenor(&self) -> u32 {
        self.rows.len() as u32
    }
}

// ---------------------------------------------------------------------------
// Core function
// ---------------------------------------------------------------------------

/// Project the balance of a facility to maturity.
pub fn build_schedule(terms: &FacilityTerms, config: &EadConfig) -> EclResult<AmortizationSchedule> {
    validate_terms(terms, config)?;

    let rate = periodic_rate(terms.annual_rate, terms.frequency, config.rate_convention)?;
    let ccf = resolve_ccf(terms, config)?;
    let n = terms.remaining_periods;

    let target = match &terms.repayment {
        RepaymentProfile::Balloon { amount } => *amount,
        _ => Decimal::ZERO,
    };
    let level_payment = match &terms.repayment {
        RepaymentProfile::Amortizing | RepaymentProfile::Balloon { .. } => {
            Some(annuity_payment(terms.outstanding, target, rate, n)?)
        }
        _ => None,
    };

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = terms.outstanding;
    let mut accrued = Decimal::ZERO;
    let mut total_interest = Decimal::ZERO;

    for period in 1..=n {
        let opening = balance;
        let interest = opening * rate;
        total_interest += interest;
        let last = period == n;

        let (payment, principal) = match &terms.repayment {
            RepaymentProfile::Amortizing | RepaymentProfile::Balloon { .. } => {
                let payment = level_payment.unwrap_or(Decimal::ZERO);
                (payment, payment - interest)
            }
            RepaymentProfile::InterestOnly => {
                if last {
                    (interest + opening, opening)
                } else {
                    (interest, Decimal::ZERO)
                }
            }
            RepaymentProfile::Bullet => {
                accrued += interest;
                if last {
                    (opening + accrued, opening)
                } else {
                    (Decimal::ZERO, Decimal::ZERO)
                }
            }
            RepaymentProfile::Custom { principal } => {
                let p = principal[period as usize - 1];
                (p + interest, p)
            }
        };

        balance = opening - principal;
        rows.push(AmortizationRow {
            period,
            opening_balance: opening,
            payment,
            interest,
            principal,
            outstanding: balance,
            exposure: exposure_for(opening, &terms.treatment, ccf),
        });
    }

    let residual = balance - target;
    if residual.abs() > config.minor_unit {
        return Err(EclError::ScheduleDivergence {
            exposure_id: terms.id.clone(),
            residual,
            tolerance: config.minor_unit,
        });
    }

    // Snap: whatever remains (balloon plus rounding) is repaid at maturity
    if let Some(final_row) = rows.last_mut() {
        final_row.principal += balance;
        final_row.payment += balance;
        final_row.outstanding = Decimal::ZERO;
    }

    Ok(AmortizationSchedule {
        exposure_id: terms.id.clone(),
        frequency: terms.frequency,
        periodic_rate: rate,
        ccf,
        rows,
        residual,
        total_interest,
    })
}

/// Whole periods of `frequency` from `valuation_date` to `maturity_date`,
/// rounding part periods up.
pub fn periods_to_maturity(
    valuation_date: NaiveDate,
    maturity_date: NaiveDate,
    frequency: Frequency,
) -> EclResult<u32> {
    let months = tenor_in_months(valuation_date, maturity_date)?;
    Ok(months.div_ceil(frequency.months()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn exposure_for(drawn: Money, treatment: &BalanceSheetTreatment, ccf: Option<Rate>) -> Money {
    match (treatment, ccf) {
        (BalanceSheetTreatment::OffBalance { limit, .. }, Some(ccf)) => {
            drawn + ccf * (*limit - drawn).max(Decimal::ZERO)
        }
        _ => drawn,
    }
}

fn resolve_ccf(terms: &FacilityTerms, config: &EadConfig) -> EclResult<Option<Rate>> {
    match &terms.treatment {
        BalanceSheetTreatment::OnBalance => Ok(None),
        BalanceSheetTreatment::OffBalance { facility_class, .. } => config
            .ccf
            .get(facility_class)
            .copied()
            .map(Some)
            .ok_or_else(|| EclError::MissingParameter {
                exposure_id: terms.id.clone(),
                parameter: format!("ccf for facility class '{facility_class}'"),
            }),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_terms(terms: &FacilityTerms, config: &EadConfig) -> EclResult<()> {
    if terms.outstanding < Decimal::ZERO {
        return Err(EclError::InvalidInput {
            field: "outstanding".into(),
            reason: format!("Exposure '{}' has a negative balance", terms.id),
        });
    }
    if terms.remaining_periods == 0 {
        return Err(EclError::InvalidInput {
            field: "remaining_periods".into(),
            reason: format!("Exposure '{}' has no remaining periods", terms.id),
        });
    }
    config.validate()?;
    if let BalanceSheetTreatment::OffBalance { limit, .. } = &terms.treatment {
        if *limit < Decimal::ZERO {
            return Err(EclError::InvalidInput {
                field: "treatment.limit".into(),
                reason: "Facility limit cannot be negative".into(),
            });
        }
    }
    match &terms.repayment {
        RepaymentProfile::Balloon { amount } => {
            if *amount < Decimal::ZERO || *amount > terms.outstanding {
                return Err(EclError::InvalidInput {
                    field: "repayment.amount".into(),
                    reason: "Balloon must lie between zero and the outstanding balance".into(),
                });
            }
        }
        RepaymentProfile::Custom { principal } => {
            if principal.len() != terms.remaining_periods as usize {
                return Err(EclError::InvalidInput {
                    field: "repayment.principal".into(),
                    reason: format!(
                        "Expected {} principal amounts, got {}",
                        terms.remaining_periods,
                        principal.len()
                    ),
                });
            }
            if principal.iter().any(|p| *p < Decimal::ZERO) {
                return Err(EclError::InvalidInput {
                    field: "repayment.principal".into(),
                    reason: "Principal repayments cannot be negative".into(),
                });
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
