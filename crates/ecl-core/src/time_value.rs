use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EclError;
use crate::types::{Frequency, Money, Rate};
use crate::EclResult;

/// How an annual contractual rate is split into a periodic rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateConvention {
    /// Annual effective rate: (1 + r)^(1/k) - 1
    #[default]
    Effective,
    /// Nominal rate compounded k times a year: r / k
    Nominal,
}

/// Convert an annual rate to the rate for one period of `frequency`.
pub fn periodic_rate(
    annual_rate: Rate,
    frequency: Frequency,
    convention: RateConvention,
) -> EclResult<Rate> {
    if annual_rate <= dec!(-1) {
        return Err(EclError::InvalidInput {
            field: "annual_rate".into(),
            reason: "Rate must be greater than -100%".into(),
        });
    }
    let k = Decimal::from(frequency.periods_per_year());
    if k == Decimal::ONE || annual_rate.is_zero() {
        return Ok(annual_rate);
    }
    Ok(match convention {
        RateConvention::Nominal => annual_rate / k,
        RateConvention::Effective => (Decimal::ONE + annual_rate).powd(Decimal::ONE / k) - Decimal::ONE,
    })
}

fn overflow(field: &str, reason: String) -> EclError {
    EclError::InvalidInput {
        field: field.into(),
        reason,
    }
}

/// Integer power via repeated squaring. Errors instead of overflowing.
pub fn pow_int(base: Decimal, exp: u32) -> EclResult<Decimal> {
    let mut result = Decimal::ONE;
    let mut b = base;
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = result
                .checked_mul(b)
                .ok_or_else(|| overflow("exponent", format!("{base}^{exp} overflows")))?;
        }
        e >>= 1;
        if e > 0 {
            b = b
                .checked_mul(b)
                .ok_or_else(|| overflow("exponent", format!("{base}^{exp} overflows")))?;
        }
    }
    Ok(result)
}

/// Discount factors 1/(1+r)^p for p = 1..=periods, built iteratively.
pub fn discount_factors(periodic_rate: Rate, periods: u32) -> EclResult<Vec<Decimal>> {
    if periodic_rate <= dec!(-1) {
        return Err(EclError::InvalidInput {
            field: "periodic_rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }
    let one_plus_r = Decimal::ONE + periodic_rate;
    let mut compounded = Decimal::ONE;
    let mut factors = Vec::with_capacity(periods as usize);
    for p in 1..=periods {
        let unrepresentable = || {
            overflow(
                "periodic_rate",
                format!("Discount factor at period {p} is not representable for rate {periodic_rate}"),
            )
        };
        compounded = compounded.checked_mul(one_plus_r).ok_or_else(unrepresentable)?;
        factors.push(Decimal::ONE.checked_div(compounded).ok_or_else(unrepresentable)?);
    }
    Ok(factors)
}

/// Level payment that amortises `principal` down to `residual` over `periods`.
pub fn annuity_payment(
    principal: Money,
    residual: Money,
    periodic_rate: Rate,
    periods: u32,
) -> EclResult<Money> {
    if periods == 0 {
        return Err(EclError::InvalidInput {
            field: "periods".into(),
            reason: "Annuity requires at least one period".into(),
        });
    }
    let n = Decimal::from(periods);
    if periodic_rate.is_zero() {
        return Ok((principal - residual) / n);
    }
    let growth = pow_int(Decimal::ONE + periodic_rate, periods)?;
    let denom = growth - Decimal::ONE;
    if denom.is_zero() {
        return Err(EclError::InvalidInput {
            field: "periodic_rate".into(),
            reason: "Annuity factor is zero".into(),
        });
    }
    // PV of payments must equal principal less PV of residual
    Ok((principal * growth - residual) * periodic_rate / denom)
}

/// Loan tenure in whole months between two dates, rounded up.
pub fn tenor_in_months(start: NaiveDate, end: NaiveDate) -> EclResult<u32> {
    let days = (end - start).num_days();
    if days < 0 {
        return Err(EclError::InvalidInput {
            field: "end".into(),
            reason: format!("End date {end} precedes start date {start}"),
        });
    }
    let months = (Decimal::from(days) / dec!(365.25) * dec!(12)).ceil();
    months.to_u32().ok_or_else(|| EclError::InvalidInput {
        field: "end".into(),
        reason: "Tenor too long".into(),
    })
}
