//! Cure and recovery curves for defaulted balances.
//!
//! The resolution chain has three states: cured and recovered are absorbing,
//! and defaulted balances either stay defaulted or resolve each period with
//! the balance-weighted one-period probabilities. Row "defaulted" of the
//! n-step chain has closed form
//!
//!   cure(n) = c (1 - s^n) / (1 - s),  recovery(n) = r (1 - s^n) / (1 - s),  unresolved(n) = s^n
//!
//! so marginal rates are c s^(n-1) and r s^(n-1).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EclError;
use crate::types::{Money, Probability};
use crate::EclResult;

/// Horizon used when a caller does not specify one.
pub const DEFAULT_WORKOUT_HORIZON: u32 = 300;

/// Outstanding balances of a defaulted cohort one period later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionBalances {
    pub cured: Money,
    #[serde(default)]
    pub recovered: Money,
    /// Still in default.
    pub unresolved: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPoint {
    pub period: u32,
    pub marginal_cure: Probability,
    pub cumulative_cure: Probability,
    pub marginal_recovery: Probability,
    pub cumulative_recovery: Probability,
    pub unresolved: Probability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutRates {
    pub one_period_cure: Probability,
    pub one_period_recovery: Probability,
    pub one_period_unresolved: Probability,
    pub points: Vec<WorkoutPoint>,
    /// Share of defaulted balance that eventually cures; usable as a
    /// collateral profile's `cure_rate`.
    pub lifetime_cure_rate: Probability,
    pub lifetime_recovery_rate: Probability,
}

/// Marginal and cumulative cure/recovery rates over `horizon` periods.
pub fn workout_rates(balances: &ResolutionBalances, horizon: u32) -> EclResult<WorkoutRates> {
    for (field, value) in [
        ("cured", balances.cured),
        ("recovered", balances.recovered),
        ("unresolved", balances.unresolved),
    ] {
        if value < Decimal::ZERO {
            return Err(EclError::InvalidInput {
                field: field.into(),
                reason: "Resolution balances cannot be negative".into(),
            });
        }
    }
    let total = balances.cured + balances.recovered + balances.unresolved;
    if total.is_zero() {
        return Err(EclError::InsufficientData {
            state: "default".into(),
            reason: "No defaulted balance to derive resolution rates from".into(),
        });
    }

    let c = balances.cured / total;
    let r = balances.recovered / total;
    let s = balances.unresolved / total;

    let mut points = Vec::with_capacity(horizon as usize);
    let mut stay = Decimal::ONE; // s^(n-1)
    let mut cumulative_cure = Decimal::ZERO;
    let mut cumulative_recovery = Decimal::ZERO;
    for period in 1..=horizon {
        let marginal_cure = c * stay;
        let marginal_recovery = r * stay;
        cumulative_cure += marginal_cure;
        cumulative_recovery += marginal_recovery;
        stay *= s;
        points.push(WorkoutPoint {
            period,
            marginal_cure,
            cumulative_cure,
            marginal_recovery,
            cumulative_recovery,
            unresolved: stay,
        });
    }

    let resolved = c + r;
    let (lifetime_cure_rate, lifetime_recovery_rate) = if resolved.is_zero() {
        (Decimal::ZERO, Decimal::ZERO)
    } else {
        (c / resolved, r / resolved)
    };
    debug!(horizon, %lifetime_cure_rate, "derived workout rates");

    Ok(WorkoutRates {
        one_period_cure: c,
        one_period_recovery: r,
        one_period_unresolved: s,
        points,
        lifetime_cure_rate,
        lifetime_recovery_rate,
    })
}
