//! PD term structures from powers of a one-period transition matrix.
//!
//! Cumulative PD for state `s` at horizon `h` is the total mass of `P^h`
//! in the default columns of row `s`. Marginal PD is the first difference.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::EclError;
use crate::pd::matrix::{matrix_multiply, TransitionMatrix};
use crate::pd::state_space::StateSpace;
use crate::types::{Frequency, Probability, ROW_SUM_TOLERANCE};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// PD at one period of a curve. Period 0 carries cumulative 0, survival 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdPoint {
    pub period: u32,
    pub marginal_pd: Probability,
    pub cumulative_pd: Probability,
    pub survival: Probability,
}

/// PD curves per originating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermStructure {
    pub frequency: Frequency,
    pub horizon: u32,
    /// state id -> points for periods 0..=horizon
    pub curves: BTreeMap<String, Vec<PdPoint>>,
}

impl TermStructure {
    pub fn curve(&self, state: &str) -> Option<&[PdPoint]> {
        self.curves.get(state).map(|c| c.as_slice())
    }

    /// Marginal PDs for periods 1..=periods starting in `state`.
    /// None when the state is unknown or the curve is too short.
    pub fn marginal_pds(&self, state: &str, periods: u32) -> Option<Vec<Probability>> {
        let curve = self.curves.get(state)?;
        if periods as usize >= curve.len() {
            return None;
        }
        Some(
            curve[1..=periods as usize]
                .iter()
                .map(|p| p.marginal_pd)
                .collect(),
        )
    }

    pub fn cumulative_pd(&self, state: &str, period: u32) -> Option<Probability> {
        self.curves
            .get(state)?
            .get(period as usize)
            .map(|p| p.cumulative_pd)
    }

    /// Check the curve invariants: cumulative PD starts at zero, is
    /// non-decreasing, lies in [0,1], and marginals plus survival sum to 1.
    pub fn validate(&self) -> EclResult<()> {
        let mut bad = Vec::new();
        for (state, curve) in &self.curves {
            let ok = curve.len() == self.horizon as usize + 1
                && curve.iter().enumerate().all(|(i, p)| p.period as usize == i)
                && curve.first().is_some_and(|p| p.cumulative_pd.is_zero())
                && curve.windows(2).all(|w| {
                    w[1].cumulative_pd >= w[0].cumulative_pd - ROW_SUM_TOLERANCE
                })
                && curve.iter().all(|p| {
                    p.cumulative_pd >= Decimal::ZERO
                        && p.cumulative_pd <= Decimal::ONE
                        && (p.cumulative_pd + p.survival - Decimal::ONE).abs() <= ROW_SUM_TOLERANCE
                });
            let marginal_sum_ok = {
                let mut running = Decimal::ZERO;
                curve.iter().all(|p| {
                    running += p.marginal_pd;
                    (running + p.survival - Decimal::ONE).abs() <= ROW_SUM_TOLERANCE
                })
            };
            if !(ok && marginal_sum_ok) {
                bad.push(state.clone());
            }
        }
        if bad.is_empty() {
            Ok(())
        } else {
            Err(EclError::MatrixValidation {
                states: bad,
                reason: "Term structure violates cumulative/marginal PD invariants".into(),
            })
        }
    }
}

/// Build a curve from cumulative PDs for periods 1..=H.
pub(crate) fn curve_from_cumulative(cumulative: &[Probability]) -> Vec<PdPoint> {
    let mut curve = Vec::with_capacity(cumulative.len() + 1);
    curve.push(PdPoint {
        period: 0,
        marginal_pd: Decimal::ZERO,
        cumulative_pd: Decimal::ZERO,
        survival: Decimal::ONE,
    });
    let mut previous = Decimal::ZERO;
    for (h, &cum) in cumulative.iter().enumerate() {
        let cum = cum.max(Decimal::ZERO).min(Decimal::ONE);
        curve.push(PdPoint {
            period: h as u32 + 1,
            marginal_pd: cum - previous,
            cumulative_pd: cum,
            survival: Decimal::ONE - cum,
        });
        previous = cum;
    }
    curve
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generates term structures from a validated one-period matrix.
#[derive(Debug, Clone)]
pub struct TermStructureGenerator {
    matrix: TransitionMatrix,
    space: StateSpace,
    frequency: Frequency,
    defaults: Vec<usize>,
}

impl TermStructureGenerator {
    pub fn new(matrix: TransitionMatrix, space: StateSpace, frequency: Frequency) -> EclResult<Self> {
        matrix.validate(&space)?;
        let defaults = space.default_indices();
        Ok(TermStructureGenerator {
            matrix,
            space,
            frequency,
            defaults,
        })
    }

    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    pub fn space(&self) -> &StateSpace {
        &self.space
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    fn default_mass(&self, m: &[Vec<Decimal>], row: usize) -> Probability {
        self.defaults.iter().map(|&d| m[row][d]).sum()
    }

    /// Term structure for every originating state out to `horizon` periods,
    /// built from P^1..P^H by successive full multiplication.
    pub fn generate(&self, horizon: u32) -> TermStructure {
        let n = self.space.len();
        let mut cumulative: Vec<Vec<Probability>> = vec![Vec::with_capacity(horizon as usize); n];

        let mut power = self.matrix.probabilities.clone();
        for h in 1..=horizon {
            if h > 1 {
                power = matrix_multiply(&power, &self.matrix.probabilities);
            }
            for (s, cum) in cumulative.iter_mut().enumerate() {
                cum.push(self.default_mass(&power, s));
            }
        }
        debug!(horizon, states = n, frequency = %self.frequency, "generated PD term structure");

        let curves = self
            .space
            .states
            .iter()
            .zip(cumulative.iter())
            .map(|(state, cum)| (state.id.clone(), curve_from_cumulative(cum)))
            .collect();

        TermStructure {
            frequency: self.frequency,
            horizon,
            curves,
        }
    }

    /// 12-month term structure (12 monthly or 4 quarterly periods).
    pub fn twelve_month(&self) -> TermStructure {
        self.generate(self.frequency.twelve_month_periods())
    }

    /// Cumulative PD from `state` at an arbitrary horizon, via
    /// exponentiation by squaring. Horizon 0 yields 0.
    pub fn cumulative_pd_at(&self, state: &str, horizon: u32) -> EclResult<Probability> {
        let row = self.space.require_index(state, "state")?;
        if horizon == 0 {
            return Ok(Decimal::ZERO);
        }
        let power = self.matrix.power(horizon);
        Ok(self.default_mass(&power.probabilities, row))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
