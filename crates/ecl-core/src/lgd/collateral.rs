//! Collateral-driven loss severity.
//!
//! Covers:
//! 1. **Collateral valuation** -- appraised value net of haircut, discounted
//!    over time-to-realization, summed across items and capped at EAD.
//! 2. **Cash recoveries** -- discounted over their expected receipt period.
//! 3. **Unsecured fallback** -- configured recovery rate when no collateral.
//! 4. **Cure adjustment** -- multiplicative or residual-severity blending.
//!
//! All arithmetic uses `rust_decimal::Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EclError;
use crate::time_value::pow_int;
use crate::types::{Money, Probability, Rate};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralItem {
    /// Free-form type label, e.g. "residential_property", "vehicle".
    pub collateral_type: String,
    pub appraised_value: Money,
    /// Forced-sale haircut in [0, 1].
    pub haircut: Rate,
    /// Periods from default until the collateral is realized.
    pub time_to_realization: u32,
}

/// Recovery assumptions for a segment (or a single exposure override).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralProfile {
    pub segment: String,
    #[serde(default)]
    pub items: Vec<CollateralItem>,
    /// Expected cash recoveries after default, before discounting.
    #[serde(default)]
    pub cash_recovery: Money,
    #[serde(default)]
    pub cash_recovery_periods: u32,
    /// Probability a defaulted account cures with no loss.
    #[serde(default)]
    pub cure_rate: Probability,
    /// Periodic discount rate applied to recoveries.
    #[serde(default)]
    pub discount_rate: Rate,
}

/// How cure probability blends with the recovery-based severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CureTreatment {
    /// LGD = (1 - cure) * (1 - RR)
    #[default]
    Multiplicative,
    /// LGD = (1 - cure) * (1 - RR) + cure * severity
    ResidualSeverity { severity: Rate },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LgdConfig {
    /// Recovery rate assumed for segments without collateral.
    pub unsecured_recovery_rate: Rate,
    pub cure_treatment: CureTreatment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LgdBreakdown {
    pub segment: String,
    pub exposure_at_default: Money,
    pub secured: bool,
    /// Sum of discounted net collateral values before the EAD cap.
    pub collateral_value: Money,
    /// Collateral value counted towards recovery (capped at EAD).
    pub collateral_recoverable: Money,
    pub cash_recovery_discounted: Money,
    pub recovery_rate: Rate,
    pub cure_rate: Probability,
    pub lgd: Rate,
}

// ---------------------------------------------------------------------------
// Core function
// ---------------------------------------------------------------------------

/// Loss given default for `exposure_at_default` under a collateral profile.
pub fn compute_lgd(
    profile: &CollateralProfile,
    exposure_at_default: Money,
    config: &LgdConfig,
) -> EclResult<LgdBreakdown> {
    validate_profile(profile, exposure_at_default, config)?;

    let one_plus_r = Decimal::ONE + profile.discount_rate;
    let secured = !profile.items.is_empty();

    let collateral_value = profile
        .items
        .iter()
        .map(|item| {
            discount_by(
                item.appraised_value * (Decimal::ONE - item.haircut),
                one_plus_r,
                item.time_to_realization,
            )
        })
        .sum::<EclResult<Money>>()?;

    let collateral_recoverable = if secured {
        collateral_value.min(exposure_at_default)
    } else {
        config.unsecured_recovery_rate * exposure_at_default
    };

    let cash_recovery_discounted =
        discount_by(profile.cash_recovery, one_plus_r, profile.cash_recovery_periods)?;

    let recovery_rate = if exposure_at_default.is_zero() {
        Decimal::ONE
    } else {
        ((collateral_recoverable + cash_recovery_discounted) / exposure_at_default)
            .max(Decimal::ZERO)
            .min(Decimal::ONE)
    };

    let lgd = if exposure_at_default.is_zero() {
        Decimal::ZERO
    } else {
        apply_cure(recovery_rate, profile.cure_rate, config.cure_treatment)
    };

    Ok(LgdBreakdown {
        segment: profile.segment.clone(),
        exposure_at_default,
        secured,
        collateral_value,
        collateral_recoverable,
        cash_recovery_discounted,
        recovery_rate,
        cure_rate: profile.cure_rate,
        lgd,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Present value of `amount` received `periods` periods out.
fn discount_by(amount: Money, one_plus_r: Decimal, periods: u32) -> EclResult<Money> {
    let growth = pow_int(one_plus_r, periods)?;
    amount
        .checked_div(growth)
        .ok_or_else(|| EclError::InvalidInput {
            field: "discount_rate".into(),
            reason: format!("Cannot discount over {periods} periods at growth factor {one_plus_r}"),
        })
}

fn apply_cure(recovery_rate: Rate, cure_rate: Probability, treatment: CureTreatment) -> Rate {
    let severity = (Decimal::ONE - cure_rate) * (Decimal::ONE - recovery_rate);
    let lgd = match treatment {
        CureTreatment::Multiplicative => severity,
        CureTreatment::ResidualSeverity { severity: residual } => severity + cure_rate * residual,
    };
    lgd.max(Decimal::ZERO).min(Decimal::ONE)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn unit_interval(value: Decimal, field: &str) -> EclResult<()> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(EclError::InvalidInput {
            field: field.into(),
            reason: format!("Must be in [0, 1], got {value}"),
        });
    }
    Ok(())
}

fn validate_profile(
    profile: &CollateralProfile,
    exposure_at_default: Money,
    config: &LgdConfig,
) -> EclResult<()> {
    if exposure_at_default < Decimal::ZERO {
        return Err(EclError::InvalidInput {
            field: "exposure_at_default".into(),
            reason: "Exposure at default cannot be negative".into(),
        });
    }
    if profile.discount_rate <= -Decimal::ONE {
        return Err(EclError::InvalidInput {
            field: "discount_rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }
    if profile.cash_recovery < Decimal::ZERO {
        return Err(EclError::InvalidInput {
            field: "cash_recovery".into(),
            reason: "Cash recovery cannot be negative".into(),
        });
    }
    unit_interval(profile.cure_rate, "cure_rate")?;
    unit_interval(config.unsecured_recovery_rate, "unsecured_recovery_rate")?;
    if let CureTreatment::ResidualSeverity { severity } = config.cure_treatment {
        unit_interval(severity, "cure_treatment.severity")?;
    }
    for item in &profile.items {
        if item.appraised_value < Decimal::ZERO {
            return Err(EclError::InvalidInput {
                field: "items.appraised_value".into(),
                reason: format!("Collateral '{}' has negative value", item.collateral_type),
            });
        }
        unit_interval(item.haircut, "items.haircut")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn approx_eq(a: Decimal, b: Decimal, eps: Decimal) -> bool {
        (a - b).abs() < eps
    }

    fn property(value: Decimal, haircut: Decimal, periods: u32) -> CollateralItem {
        CollateralItem {
            collateral_type: "residential_property".into(),
            appraised_value: value,
            haircut,
            time_to_realization: periods,
        }
    }

    fn mortgage_profile() -> CollateralProfile {
        CollateralProfile {
            segment: "mortgage".into(),
            items: vec![property(dec!(100_000), dec!(0.30), 4)],
            cash_recovery: Decimal::ZERO,
            cash_recovery_periods: 0,
            cure_rate: Decimal::ZERO,
            discount_rate: dec!(0.02),
        }
    }

    #[test]
    fn test_discounted_collateral_value() {
        let out = compute_lgd(&mortgage_profile(), dec!(100_000), &LgdConfig::default()).unwrap();
        // 70,000 / 1.02^4 = 64,669.18
        assert!(approx_eq(out.collateral_value, dec!(64_669.18), dec!(0.01)));
        assert!(approx_eq(out.recovery_rate, dec!(0.6466918), dec!(0.000001)));
        assert!(approx_eq(out.lgd, dec!(0.3533082), dec!(0.000001)));
        assert!(out.secured);
    }

    #[test]
    fn test_collateral_capped_at_ead() {
        let mut profile = mortgage_profile();
        profile.items.push(property(dec!(500_000), dec!(0.10), 0));
        let out = compute_lgd(&profile, dec!(100_000), &LgdConfig::default()).unwrap();
        assert_eq!(out.collateral_recoverable, dec!(100_000));
        assert_eq!(out.recovery_rate, Decimal::ONE);
        assert_eq!(out.lgd, Decimal::ZERO);
    }

    #[test]
    fn test_unsecured_uses_configured_recovery() {
        let profile = CollateralProfile {
            segment: "cards".into(),
            items: vec![],
            cash_recovery: Decimal::ZERO,
            cash_recovery_periods: 0,
            cure_rate: Decimal::ZERO,
            discount_rate: Decimal::ZERO,
        };
        let config = LgdConfig {
            unsecured_recovery_rate: dec!(0.25),
            ..LgdConfig::default()
        };
        let out = compute_lgd(&profile, dec!(5_000), &config).unwrap();
        assert!(!out.secured);
        assert_eq!(out.lgd, dec!(0.75));
    }

    #[test]
    fn test_cash_recovery_adds_to_collateral() {
        let mut profile = mortgage_profile();
        profile.items.clear();
        profile.cash_recovery = dec!(10_200);
        profile.cash_recovery_periods = 1;
        let out = compute_lgd(&profile, dec!(100_000), &LgdConfig::default()).unwrap();
        assert_eq!(out.cash_recovery_discounted, dec!(10_000));
        assert_eq!(out.recovery_rate, dec!(0.1));
    }

    #[test]
    fn test_multiplicative_cure() {
        let mut profile = mortgage_profile();
        profile.items.clear();
        profile.cure_rate = dec!(0.40);
        let config = LgdConfig {
            unsecured_recovery_rate: dec!(0.50),
            cure_treatment: CureTreatment::Multiplicative,
        };
        let out = compute_lgd(&profile, dec!(1_000), &config).unwrap();
        assert_eq!(out.lgd, dec!(0.30));
    }

    #[test]
    fn test_residual_severity_cure() {
        let mut profile = mortgage_profile();
        profile.items.clear();
        profile.cure_rate = dec!(0.40);
        let config = LgdConfig {
            unsecured_recovery_rate: dec!(0.50),
            cure_treatment: CureTreatment::ResidualSeverity {
                severity: dec!(0.05),
            },
        };
        let out = compute_lgd(&profile, dec!(1_000), &config).unwrap();
        // 0.6 * 0.5 + 0.4 * 0.05
        assert_eq!(out.lgd, dec!(0.32));
    }

    #[test]
    fn test_zero_ead_has_no_loss() {
        let out = compute_lgd(&mortgage_profile(), Decimal::ZERO, &LgdConfig::default()).unwrap();
        assert_eq!(out.recovery_rate, Decimal::ONE);
        assert_eq!(out.lgd, Decimal::ZERO);
    }

    #[test]
    fn test_higher_haircut_never_lowers_lgd() {
        let mut previous = Decimal::ZERO;
        for h in [dec!(0), dec!(0.1), dec!(0.35), dec!(0.6), dec!(0.9), dec!(1)] {
            let mut profile = mortgage_profile();
            profile.items[0].haircut = h;
            let lgd = compute_lgd(&profile, dec!(100_000), &LgdConfig::default())
                .unwrap()
                .lgd;
            assert!(lgd >= previous);
            assert!(lgd >= Decimal::ZERO && lgd <= Decimal::ONE);
            previous = lgd;
        }
    }

    #[test]
    fn test_haircut_out_of_range_rejected() {
        let mut profile = mortgage_profile();
        profile.items[0].haircut = dec!(1.2);
        let result = compute_lgd(&profile, dec!(100_000), &LgdConfig::default());
        assert!(matches!(result, Err(EclError::InvalidInput { .. })));
    }

    #[test]
    fn test_unrepresentable_realization_period_is_an_error() {
        let mut profile = mortgage_profile();
        profile.items[0].time_to_realization = 4000;
        let result = compute_lgd(&profile, dec!(100_000), &LgdConfig::default());
        assert!(matches!(result, Err(EclError::InvalidInput { .. })));
    }
}
