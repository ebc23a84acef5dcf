use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EclError;
use crate::pd::state_space::StateSpace;
use crate::types::{Probability, ROW_SUM_TOLERANCE};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One-period transition matrix. Never mutated in place: every
/// transformation returns a new matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    /// State ids, in state-space order.
    pub states: Vec<String>,
    /// Row i = from states[i], column j = to states[j]; each row sums to 1
    pub probabilities: Vec<Vec<Probability>>,
}

/// Summary of stochasticity checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixQuality {
    /// max |row_sum - 1|
    pub max_row_deviation: Decimal,
    /// Higher-ranked (riskier) non-absorbing states have a one-period
    /// default probability at least as high as lower-ranked ones.
    pub is_monotone: bool,
}

// ---------------------------------------------------------------------------
// Matrix operations (all Decimal)
// ---------------------------------------------------------------------------

/// Multiply two square matrices of Decimals.
pub(crate) fn matrix_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Vec<Vec<Decimal>> {
    let n = a.len();
    let mut result = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i][k];
            if aik.is_zero() {
                continue;
            }
            for j in 0..n {
                result[i][j] += aik * b[k][j];
            }
        }
    }
    result
}

pub(crate) fn identity(n: usize) -> Vec<Vec<Decimal>> {
    let mut id = vec![vec![Decimal::ZERO; n]; n];
    for (i, row) in id.iter_mut().enumerate() {
        row[i] = Decimal::ONE;
    }
    id
}

/// Raise a square matrix to integer power via repeated squaring.
pub(crate) fn matrix_power(m: &[Vec<Decimal>], exp: u32) -> Vec<Vec<Decimal>> {
    let mut result = identity(m.len());
    let mut base = m.to_vec();
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = matrix_multiply(&result, &base);
        }
        e >>= 1;
        if e > 0 {
            base = matrix_multiply(&base, &base);
        }
    }
    result
}

impl TransitionMatrix {
    pub fn identity(states: Vec<String>) -> Self {
        let n = states.len();
        TransitionMatrix {
            states,
            probabilities: identity(n),
        }
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    pub fn index_of(&self, state: &str) -> Option<usize> {
        self.states.iter().position(|s| s == state)
    }

    pub fn probability(&self, from: &str, to: &str) -> Option<Probability> {
        Some(self.probabilities[self.index_of(from)?][self.index_of(to)?])
    }

    /// Product `self · other`, returned as a new matrix.
    pub fn multiply(&self, other: &TransitionMatrix) -> EclResult<TransitionMatrix> {
        if self.states != other.states {
            return Err(EclError::InvalidInput {
                field: "states".into(),
                reason: "Cannot multiply matrices over different state spaces".into(),
            });
        }
        Ok(TransitionMatrix {
            states: self.states.clone(),
            probabilities: matrix_multiply(&self.probabilities, &other.probabilities),
        })
    }

    /// n-step transition matrix P^n (exponentiation by squaring).
    pub fn power(&self, n: u32) -> TransitionMatrix {
        TransitionMatrix {
            states: self.states.clone(),
            probabilities: matrix_power(&self.probabilities, n),
        }
    }

    /// Sum of the default columns for one row.
    pub fn default_mass(&self, row: usize, space: &StateSpace) -> Probability {
        space
            .default_indices()
            .into_iter()
            .map(|d| self.probabilities[row][d])
            .sum()
    }

    /// Check the stochastic-matrix invariants against a state space:
    /// square shape, entries in [0,1], rows summing to 1 within 1e-9, and
    /// absorbing rows exactly equal to identity rows.
    pub fn validate(&self, space: &StateSpace) -> EclResult<MatrixQuality> {
        let n = space.len();
        if self.states != space.ids() {
            return Err(EclError::MatrixValidation {
                states: self.states.clone(),
                reason: "Matrix states do not match the state space".into(),
            });
        }
        if self.probabilities.len() != n || self.probabilities.iter().any(|r| r.len() != n) {
            return Err(EclError::MatrixValidation {
                states: self.states.clone(),
                reason: format!("Matrix must be {n}x{n}"),
            });
        }

        let mut max_row_deviation = Decimal::ZERO;
        let mut bad_rows = Vec::new();
        let mut negative = Vec::new();
        for (i, row) in self.probabilities.iter().enumerate() {
            if row.iter().any(|p| *p < Decimal::ZERO || *p > Decimal::ONE) {
                negative.push(self.states[i].clone());
            }
            let row_sum: Decimal = row.iter().copied().sum();
            let dev = (row_sum - Decimal::ONE).abs();
            max_row_deviation = max_row_deviation.max(dev);
            if dev > ROW_SUM_TOLERANCE {
                bad_rows.push(self.states[i].clone());
            }
        }
        if !negative.is_empty() {
            return Err(EclError::MatrixValidation {
                states: negative,
                reason: "Transition probabilities must lie in [0, 1]".into(),
            });
        }
        if !bad_rows.is_empty() {
            return Err(EclError::MatrixValidation {
                states: bad_rows,
                reason: format!(
                    "Row sums deviate from 1 by more than {ROW_SUM_TOLERANCE} (max {max_row_deviation})"
                ),
            });
        }

        let non_identity: Vec<String> = space
            .absorbing_indices()
            .into_iter()
            .filter(|&a| {
                self.probabilities[a]
                    .iter()
                    .enumerate()
                    .any(|(j, p)| *p != if j == a { Decimal::ONE } else { Decimal::ZERO })
            })
            .map(|a| self.states[a].clone())
            .collect();
        if !non_identity.is_empty() {
            return Err(EclError::MatrixValidation {
                states: non_identity,
                reason: "Absorbing rows must be identity rows".into(),
            });
        }

        // Monotonicity: riskier non-absorbing states should not default less often
        let mut ranked: Vec<(u32, Probability)> = space
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.absorbing)
            .map(|(i, s)| (s.rank, self.default_mass(i, space)))
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);
        let is_monotone = ranked.windows(2).all(|w| w[1].1 >= w[0].1);

        Ok(MatrixQuality {
            max_row_deviation,
            is_monotone,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
