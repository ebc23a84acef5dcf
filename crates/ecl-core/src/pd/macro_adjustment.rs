//! Point-in-time adjustment of through-the-cycle PDs.
//!
//! Covers:
//! 1. **Single-factor shift** -- per-period conditional default rates are
//!    moved in probit space by the macro credit index, weighted by a
//!    calibrated per-state sensitivity.
//! 2. **Scenario blending** -- scenario PDs (not factors) are
//!    probability-weighted at each period.
//! 3. **Conditional matrices** -- one-period PIT transition matrices.
//!
//! Probit transform: N_inv(PD_pit) = N_inv(PD_ttc) - beta * sqrt(rho / (1 - rho)) * z.
//! A neutral factor (z = 0) reproduces the TTC PD exactly.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::EclError;
use crate::pd::matrix::TransitionMatrix;
use crate::pd::state_space::StateSpace;
use crate::pd::term_structure::{PdPoint, TermStructure};
use crate::types::{Probability, ROW_SUM_TOLERANCE};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// A named macro scenario with its forecast credit-index path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroScenario {
    pub name: String,
    /// Probability weight. Weights across scenarios sum to 1.
    pub weight: Decimal,
    /// Standardised credit index per future period (z-scores; negative = stress).
    pub factor_path: Vec<Decimal>,
}

/// Factor value used past the end of a forecast path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathExtension {
    /// Revert to the long-run average (z = 0).
    #[default]
    Neutral,
    /// Hold the last forecast value.
    HoldLast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// Asset correlation rho in [0, 1).
    pub asset_correlation: Decimal,
    /// Sensitivity (beta >= 0) per credit state id.
    pub sensitivities: BTreeMap<String, Decimal>,
    pub path_extension: PathExtension,
}

impl Default for MacroConfig {
    fn default() -> Self {
        MacroConfig {
            asset_correlation: dec!(0.15),
            sensitivities: BTreeMap::new(),
            path_extension: PathExtension::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTermStructure {
    pub name: String,
    pub weight: Decimal,
    pub term_structure: TermStructure,
}

/// Blended PIT term structure, with the TTC input kept for disclosure and
/// backtesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedTermStructure {
    pub through_the_cycle: TermStructure,
    pub point_in_time: TermStructure,
    pub scenarios: Vec<ScenarioTermStructure>,
}

// ---------------------------------------------------------------------------
// Probit shift
// ---------------------------------------------------------------------------

struct ProbitShift {
    normal: Normal,
    /// sqrt(rho / (1 - rho))
    loading: f64,
}

impl ProbitShift {
    fn new(asset_correlation: Decimal) -> EclResult<Self> {
        let rho = asset_correlation;
        let normal = Normal::new(0.0, 1.0).map_err(|e| EclError::Calibration {
            states: vec![],
            reason: format!("standard normal unavailable: {e}"),
        })?;
        let ratio = rho / (Decimal::ONE - rho);
        let loading = ratio.sqrt().and_then(|r| r.to_f64()).ok_or_else(|| {
            EclError::Calibration {
                states: vec![],
                reason: format!("cannot derive factor loading from asset correlation {rho}"),
            }
        })?;
        Ok(ProbitShift { normal, loading })
    }

    /// Shift a one-period default probability by `beta * loading * z` in
    /// probit space. Non-increasing in z for beta >= 0.
    fn apply(&self, pd: Probability, beta: Decimal, z: Decimal) -> EclResult<Probability> {
        if pd <= Decimal::ZERO || pd >= Decimal::ONE || beta.is_zero() || z.is_zero() {
            return Ok(pd);
        }
        let (p, b, f) = match (pd.to_f64(), beta.to_f64(), z.to_f64()) {
            (Some(p), Some(b), Some(f)) => (p, b, f),
            _ => {
                return Err(EclError::Calibration {
                    states: vec![],
                    reason: format!("non-representable PD {pd} or factor {z}"),
                })
            }
        };
        let shifted = self.normal.cdf(self.normal.inverse_cdf(p) - b * self.loading * f);
        let out = Decimal::from_f64(shifted).unwrap_or(if shifted >= 0.5 {
            Decimal::ONE
        } else {
            Decimal::ZERO
        });
        Ok(out.max(Decimal::ZERO).min(Decimal::ONE))
    }
}

// ---------------------------------------------------------------------------
// Core functions
// ---------------------------------------------------------------------------

/// Convert a TTC term structure into scenario-conditioned PIT structures and
/// blend them by scenario weight.
pub fn adjust_term_structure(
    ttc: &TermStructure,
    base_matrix: &TransitionMatrix,
    space: &StateSpace,
    scenarios: &[MacroScenario],
    config: &MacroConfig,
) -> EclResult<AdjustedTermStructure> {
    ttc.validate()?;
    validate_scenarios(scenarios)?;
    let betas = resolve_sensitivities(base_matrix, space, config)?;
    let shift = ProbitShift::new(config.asset_correlation)?;

    let mut scenario_structures = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let mut curves = BTreeMap::new();
        for (state, curve) in &ttc.curves {
            let beta = betas.get(state).copied().unwrap_or(Decimal::ZERO);
            curves.insert(
                state.clone(),
                condition_curve(curve, beta, scenario, config.path_extension, &shift)?,
            );
        }
        debug!(scenario = %scenario.name, horizon = ttc.horizon, "conditioned term structure");
        scenario_structures.push(ScenarioTermStructure {
            name: scenario.name.clone(),
            weight: scenario.weight,
            term_structure: TermStructure {
                frequency: ttc.frequency,
                horizon: ttc.horizon,
                curves,
            },
        });
    }

    let point_in_time = blend(ttc, &scenario_structures);

    Ok(AdjustedTermStructure {
        through_the_cycle: ttc.clone(),
        point_in_time,
        scenarios: scenario_structures,
    })
}

/// One-period PIT transition matrix for a single factor value. Each
/// non-absorbing row's default mass is shifted and the remaining mass
/// rescaled proportionally, so rows still sum to 1.
pub fn conditional_matrix(
    base_matrix: &TransitionMatrix,
    space: &StateSpace,
    z: Decimal,
    config: &MacroConfig,
) -> EclResult<TransitionMatrix> {
    let betas = resolve_sensitivities(base_matrix, space, config)?;
    let shift = ProbitShift::new(config.asset_correlation)?;
    let defaults = space.default_indices();

    let mut probabilities = base_matrix.probabilities.clone();
    for (i, state) in space.states.iter().enumerate() {
        if state.absorbing {
            continue;
        }
        let beta = betas.get(&state.id).copied().unwrap_or(Decimal::ZERO);
        let d = base_matrix.default_mass(i, space);
        if d.is_zero() || d >= Decimal::ONE {
            continue;
        }
        let d_pit = shift.apply(d, beta, z)?;
        let default_scale = d_pit / d;
        let other_scale = (Decimal::ONE - d_pit) / (Decimal::ONE - d);
        for (j, p) in probabilities[i].iter_mut().enumerate() {
            *p *= if defaults.contains(&j) {
                default_scale
            } else {
                other_scale
            };
        }
    }

    let matrix = TransitionMatrix {
        states: base_matrix.states.clone(),
        probabilities,
    };
    matrix.validate(space)?;
    Ok(matrix)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn factor_at(scenario: &MacroScenario, period: u32, extension: PathExtension) -> Decimal {
    let idx = period as usize - 1;
    match scenario.factor_path.get(idx) {
        Some(z) => *z,
        None => match extension {
            PathExtension::Neutral => Decimal::ZERO,
            PathExtension::HoldLast => scenario.factor_path.last().copied().unwrap_or(Decimal::ZERO),
        },
    }
}

/// Re-derive a curve period by period from shifted conditional default rates.
fn condition_curve(
    curve: &[PdPoint],
    beta: Decimal,
    scenario: &MacroScenario,
    extension: PathExtension,
    shift: &ProbitShift,
) -> EclResult<Vec<PdPoint>> {
    let mut out = Vec::with_capacity(curve.len());
    out.push(curve[0].clone());
    let mut survival = Decimal::ONE;
    let mut diverged = false;
    for w in curve.windows(2) {
        let (prev, point) = (&w[0], &w[1]);
        let hazard = if prev.survival > Decimal::ZERO {
            (point.marginal_pd / prev.survival).min(Decimal::ONE)
        } else {
            Decimal::ZERO
        };
        let z = factor_at(scenario, point.period, extension);
        let hazard_pit = shift.apply(hazard, beta, z)?;
        if !diverged && hazard_pit == hazard {
            // Unshifted prefix: keep the TTC point exactly
            survival = point.survival;
            out.push(point.clone());
            continue;
        }
        diverged = true;
        let marginal = survival * hazard_pit;
        survival -= marginal;
        out.push(PdPoint {
            period: point.period,
            marginal_pd: marginal,
            cumulative_pd: Decimal::ONE - survival,
            survival,
        });
    }
    Ok(out)
}

/// Probability-weighted average of scenario PDs at each period.
fn blend(ttc: &TermStructure, scenarios: &[ScenarioTermStructure]) -> TermStructure {
    let mut curves = BTreeMap::new();
    for (state, ttc_curve) in &ttc.curves {
        let mut blended = Vec::with_capacity(ttc_curve.len());
        for (t, point) in ttc_curve.iter().enumerate() {
            let mut cumulative = Decimal::ZERO;
            let mut marginal = Decimal::ZERO;
            for s in scenarios {
                if let Some(p) = s.term_structure.curves.get(state).and_then(|c| c.get(t)) {
                    cumulative += s.weight * p.cumulative_pd;
                    marginal += s.weight * p.marginal_pd;
                }
            }
            blended.push(PdPoint {
                period: point.period,
                marginal_pd: marginal,
                cumulative_pd: cumulative,
                survival: Decimal::ONE - cumulative,
            });
        }
        curves.insert(state.clone(), blended);
    }
    TermStructure {
        frequency: ttc.frequency,
        horizon: ttc.horizon,
        curves,
    }
}

/// Sensitivities per state; every non-absorbing state with historical
/// one-period default transitions must be calibrated.
fn resolve_sensitivities(
    base_matrix: &TransitionMatrix,
    space: &StateSpace,
    config: &MacroConfig,
) -> EclResult<BTreeMap<String, Decimal>> {
    let rho = config.asset_correlation;
    if rho < Decimal::ZERO || rho >= Decimal::ONE {
        return Err(EclError::Calibration {
            states: vec![],
            reason: format!("asset correlation {rho} must be in [0, 1)"),
        });
    }
    base_matrix.validate(space)?;

    let unknown: Vec<String> = config
        .sensitivities
        .keys()
        .filter(|k| space.index_of(k).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(EclError::Calibration {
            states: unknown,
            reason: "sensitivities supplied for states outside the state space".into(),
        });
    }

    let negative: Vec<String> = config
        .sensitivities
        .iter()
        .filter(|(_, b)| **b < Decimal::ZERO)
        .map(|(k, _)| k.clone())
        .collect();
    if !negative.is_empty() {
        return Err(EclError::Calibration {
            states: negative,
            reason: "sensitivities must be non-negative so that stress never lowers PD".into(),
        });
    }

    let missing: Vec<String> = space
        .states
        .iter()
        .enumerate()
        .filter(|(i, s)| {
            !s.absorbing
                && base_matrix.default_mass(*i, space) > Decimal::ZERO
                && !config.sensitivities.contains_key(&s.id)
        })
        .map(|(_, s)| s.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(EclError::Calibration {
            states: missing,
            reason: "missing macro sensitivity for states with historical default transitions"
                .into(),
        });
    }

    Ok(config.sensitivities.clone())
}

fn validate_scenarios(scenarios: &[MacroScenario]) -> EclResult<()> {
    if scenarios.is_empty() {
        return Err(EclError::InvalidInput {
            field: "scenarios".into(),
            reason: "At least one macro scenario is required".into(),
        });
    }
    for s in scenarios {
        if s.weight < Decimal::ZERO {
            return Err(EclError::InvalidInput {
                field: "scenarios.weight".into(),
                reason: format!("Scenario '{}' has a negative weight", s.name),
            });
        }
    }
    let total: Decimal = scenarios.iter().map(|s| s.weight).sum();
    if (total - Decimal::ONE).abs() > ROW_SUM_TOLERANCE {
        return Err(EclError::InvalidInput {
            field: "scenarios.weight".into(),
            reason: format!("Scenario weights must sum to 1.0, got {total}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pd::state_space::CreditState;
    use crate::pd::term_structure::TermStructureGenerator;
    use crate::types::Frequency;

    fn space() -> StateSpace {
        let s = |id: &str, rank, absorbing, default| CreditState {
            id: id.into(),
            rank,
            absorbing,
            default,
            dpd_floor: None,
        };
        StateSpace::new(vec![
            s("stage_1", 0, false, false),
            s("stage_2", 1, false, false),
            s("stage_3", 2, true, true),
        ])
        .unwrap()
    }

    fn matrix() -> TransitionMatrix {
        TransitionMatrix {
            states: space().ids(),
            probabilities: vec![
                vec![dec!(0.95), dec!(0.04), dec!(0.01)],
                vec![dec!(0.30), dec!(0.60), dec!(0.10)],
                vec![dec!(0), dec!(0), dec!(1)],
            ],
        }
    }

    fn ttc(horizon: u32) -> TermStructure {
        TermStructureGenerator::new(matrix(), space(), Frequency::Monthly)
            .unwrap()
            .generate(horizon)
    }

    fn config() -> MacroConfig {
        let mut sensitivities = BTreeMap::new();
        sensitivities.insert("stage_1".to_string(), dec!(1.0));
        sensitivities.insert("stage_2".to_string(), dec!(0.8));
        MacroConfig {
            asset_correlation: dec!(0.15),
            sensitivities,
            path_extension: PathExtension::Neutral,
        }
    }

    fn scenario(name: &str, weight: Decimal, z: Decimal, len: usize) -> MacroScenario {
        MacroScenario {
            name: name.into(),
            weight,
            factor_path: vec![z; len],
        }
    }

    fn three_scenarios() -> Vec<MacroScenario> {
        vec![
            scenario("upside", dec!(0.2), dec!(1.0), 12),
            scenario("base", dec!(0.5), dec!(0), 12),
            scenario("downside", dec!(0.3), dec!(-2.0), 12),
        ]
    }

    #[test]
    fn test_neutral_factor_reproduces_ttc() {
        let ttc = ttc(24);
        let out = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("base", Decimal::ONE, Decimal::ZERO, 24)],
            &config(),
        )
        .unwrap();
        assert_eq!(out.point_in_time, ttc);
        assert_eq!(out.through_the_cycle, ttc);
    }

    #[test]
    fn test_stress_raises_pd_every_period() {
        let ttc = ttc(24);
        let out = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("downside", Decimal::ONE, dec!(-1.5), 24)],
            &config(),
        )
        .unwrap();
        for t in 1..=24 {
            let base = ttc.cumulative_pd("stage_1", t).unwrap();
            let pit = out.point_in_time.cumulative_pd("stage_1", t).unwrap();
            assert!(pit > base, "period {t}: PIT {pit} should exceed TTC {base}");
        }
    }

    #[test]
    fn test_more_stress_never_lowers_pd() {
        let ttc = ttc(12);
        let mild = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("mild", Decimal::ONE, dec!(-0.5), 12)],
            &config(),
        )
        .unwrap();
        let severe = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("severe", Decimal::ONE, dec!(-2.5), 12)],
            &config(),
        )
        .unwrap();
        for state in ["stage_1", "stage_2"] {
            for t in 1..=12 {
                assert!(
                    severe.point_in_time.cumulative_pd(state, t).unwrap()
                        >= mild.point_in_time.cumulative_pd(state, t).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_blend_is_convex_combination() {
        let ttc = ttc(12);
        let out =
            adjust_term_structure(&ttc, &matrix(), &space(), &three_scenarios(), &config()).unwrap();
        for state in ["stage_1", "stage_2"] {
            for t in 0..=12u32 {
                let values: Vec<Decimal> = out
                    .scenarios
                    .iter()
                    .map(|s| s.term_structure.cumulative_pd(state, t).unwrap())
                    .collect();
                let lo = values.iter().copied().min().unwrap();
                let hi = values.iter().copied().max().unwrap();
                let blended = out.point_in_time.cumulative_pd(state, t).unwrap();
                assert!(blended >= lo - ROW_SUM_TOLERANCE && blended <= hi + ROW_SUM_TOLERANCE);
            }
        }
    }

    #[test]
    fn test_blended_structure_is_valid() {
        let ttc = ttc(36);
        let out =
            adjust_term_structure(&ttc, &matrix(), &space(), &three_scenarios(), &config()).unwrap();
        out.point_in_time.validate().unwrap();
        for s in &out.scenarios {
            s.term_structure.validate().unwrap();
        }
    }

    #[test]
    fn test_neutral_extension_after_path() {
        let ttc = ttc(6);
        let out = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("short", Decimal::ONE, dec!(-2), 2)],
            &config(),
        )
        .unwrap();
        let curve = out.point_in_time.curve("stage_1").unwrap();
        let ttc_curve = ttc.curve("stage_1").unwrap();
        // Periods past the path use TTC hazards, so the conditional default rate matches
        let hazard = |c: &[PdPoint], t: usize| c[t].marginal_pd / c[t - 1].survival;
        assert!((hazard(curve, 5) - hazard(ttc_curve, 5)).abs() < dec!(0.0000001));
        assert!(hazard(curve, 1) > hazard(ttc_curve, 1));
    }

    #[test]
    fn test_hold_last_extension_keeps_stress() {
        let ttc = ttc(6);
        let cfg = MacroConfig {
            path_extension: PathExtension::HoldLast,
            ..config()
        };
        let out = adjust_term_structure(
            &ttc,
            &matrix(),
            &space(),
            &[scenario("short", Decimal::ONE, dec!(-2), 2)],
            &cfg,
        )
        .unwrap();
        let curve = out.point_in_time.curve("stage_1").unwrap();
        let ttc_curve = ttc.curve("stage_1").unwrap();
        let hazard = |c: &[PdPoint], t: usize| c[t].marginal_pd / c[t - 1].survival;
        assert!(hazard(curve, 5) > hazard(ttc_curve, 5));
    }

    #[test]
    fn test_missing_sensitivity_is_calibration_error() {
        let mut cfg = config();
        cfg.sensitivities.remove("stage_2");
        match adjust_term_structure(&ttc(12), &matrix(), &space(), &three_scenarios(), &cfg) {
            Err(EclError::Calibration { states, .. }) => assert_eq!(states, vec!["stage_2"]),
            other => panic!("expected Calibration, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_sensitivity_rejected() {
        let mut cfg = config();
        cfg.sensitivities.insert("stage_1".into(), dec!(-0.5));
        let result = adjust_term_structure(&ttc(12), &matrix(), &space(), &three_scenarios(), &cfg);
        assert!(matches!(result, Err(EclError::Calibration { .. })));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut scenarios = three_scenarios();
        scenarios[0].weight = dec!(0.3);
        let result = adjust_term_structure(&ttc(12), &matrix(), &space(), &scenarios, &config());
        assert!(matches!(result, Err(EclError::InvalidInput { .. })));
    }

    #[test]
    fn test_conditional_matrix_rows_stochastic() {
        let stressed = conditional_matrix(&matrix(), &space(), dec!(-2), &config()).unwrap();
        assert!(stressed.probabilities[0][2] > dec!(0.01));
        assert!(stressed.probabilities[1][2] > dec!(0.10));
        assert_eq!(stressed.probabilities[2], vec![dec!(0), dec!(0), dec!(1)]);
    }

    #[test]
    fn test_conditional_matrix_neutral_is_identity_transform() {
        let neutral = conditional_matrix(&matrix(), &space(), Decimal::ZERO, &config()).unwrap();
        assert_eq!(neutral, matrix());
    }

    #[test]
    fn test_empty_ttc_curve_is_rejected() {
        let mut malformed = ttc(12);
        malformed.curves.insert("stage_1".into(), Vec::new());
        let result = adjust_term_structure(
            &malformed,
            &matrix(),
            &space(),
            &three_scenarios(),
            &config(),
        );
        assert!(matches!(
            result,
            Err(EclError::MatrixValidation { ref states, .. }) if states == &vec!["stage_1".to_string()]
        ));
    }

    #[test]
    fn test_misnumbered_ttc_periods_are_rejected() {
        let mut malformed = ttc(12);
        if let Some(curve) = malformed.curves.get_mut("stage_2") {
            curve[1].period = 0;
        }
        let result = adjust_term_structure(
            &malformed,
            &matrix(),
            &space(),
            &three_scenarios(),
            &config(),
        );
        assert!(matches!(result, Err(EclError::MatrixValidation { .. })));
    }
}
