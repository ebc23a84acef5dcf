//! Empirical transition-matrix estimation from loan-book snapshots.
//!
//! Transitions inside a lookback window are counted (or balance-weighted)
//! per (from, to) pair and normalised by row. Coarser frequencies are built
//! by chaining each entity's consecutive observations. Sparse rows fail
//! unless a fallback policy is configured explicitly.

use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::EclError;
use crate::pd::matrix::{MatrixQuality, TransitionMatrix};
use crate::pd::state_space::StateSpace;
use crate::types::{Frequency, Money};
use crate::EclResult;

// ---------------------------------------------------------------------------
// Input / Output
// ---------------------------------------------------------------------------

/// One historical (entity, period, from, to) transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    /// Portfolio segment (loan type); None when the book is not segmented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    /// Snapshot date at which `from_state` was observed.
    pub period: NaiveDate,
    pub from_state: String,
    pub to_state: String,
    /// Outstanding balance at `period`; required for balance weighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Money>,
}

/// How each observed transition contributes to the counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Count,
    /// Weight by outstanding balance.
    Balance,
}

/// What to do with a non-absorbing state that has no outgoing observations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Fail with `InsufficientData`.
    #[default]
    None,
    /// Re-estimate the row from a wider lookback window.
    CarryForward { wider_lookback_months: u32 },
    /// Spread the row uniformly across all states.
    UniformRow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub lookback_months: u32,
    /// Spacing of the supplied snapshots.
    pub observation_frequency: Frequency,
    /// One matrix is produced per entry.
    pub frequencies: Vec<Frequency>,
    pub weighting: Weighting,
    /// Target states that take an observation out of the sample (e.g. "exit").
    pub excluded_targets: Vec<String>,
    pub fallback: FallbackPolicy,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        EstimationConfig {
            lookback_months: 36,
            observation_frequency: Frequency::Monthly,
            frequencies: vec![Frequency::Monthly],
            weighting: Weighting::Count,
            excluded_targets: vec!["exit".into()],
            fallback: FallbackPolicy::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatedMatrix {
    pub frequency: Frequency,
    pub matrix: TransitionMatrix,
    pub quality: MatrixQuality,
    /// Number of transitions backing each row, in state order.
    pub row_observations: Vec<u64>,
    /// Rows filled by the fallback policy.
    pub fallback_rows: Vec<String>,
}

// ---------------------------------------------------------------------------
// Core function
// ---------------------------------------------------------------------------

/// Estimate one transition matrix per configured frequency.
pub fn estimate_transition_matrices(
    observations: &[Observation],
    space: &StateSpace,
    as_of: NaiveDate,
    config: &EstimationConfig,
) -> EclResult<Vec<EstimatedMatrix>> {
    validate_config(config)?;
    config
        .frequencies
        .iter()
        .map(|&freq| estimate_transition_matrix(observations, space, as_of, freq, config))
        .collect()
}

/// Estimate the matrix for a single frequency.
pub fn estimate_transition_matrix(
    observations: &[Observation],
    space: &StateSpace,
    as_of: NaiveDate,
    frequency: Frequency,
    config: &EstimationConfig,
) -> EclResult<EstimatedMatrix> {
    validate_config(config)?;
    let steps = step_ratio(config.observation_frequency, frequency)?;
    let n = space.len();

    let (weights, counts) =
        count_transitions(observations, space, as_of, config.lookback_months, steps, config)?;

    // Wider window is only computed when a row actually needs it
    let mut wider: Option<(Vec<Vec<Decimal>>, Vec<u64>)> = None;

    let mut probabilities = vec![vec![Decimal::ZERO; n]; n];
    let mut fallback_rows = Vec::new();
    for (i, state) in space.states.iter().enumerate() {
        if state.absorbing {
            probabilities[i][i] = Decimal::ONE;
            continue;
        }

        let total: Decimal = weights[i].iter().copied().sum();
        if total > Decimal::ZERO {
            probabilities[i] = normalise(&weights[i], total);
            debug!(state = %state.id, observations = counts[i], "estimated transition row");
            continue;
        }

        match &config.fallback {
            FallbackPolicy::None => {
                return Err(EclError::InsufficientData {
                    state: state.id.clone(),
                    reason: format!(
                        "no outgoing transitions in the {}-month window ending {as_of}",
                        config.lookback_months
                    ),
                });
            }
            FallbackPolicy::UniformRow => {
                let share = Decimal::ONE / Decimal::from(n as u64);
                probabilities[i] = vec![share; n];
            }
            FallbackPolicy::CarryForward {
                wider_lookback_months,
            } => {
                if wider.is_none() {
                    wider = Some(count_transitions(
                        observations,
                        space,
                        as_of,
                        *wider_lookback_months,
                        steps,
                        config,
                    )?);
                }
                let (wide_weights, _) = wider.as_ref().ok_or_else(|| EclError::InsufficientData {
                    state: state.id.clone(),
                    reason: "wider window unavailable".into(),
                })?;
                let wide_total: Decimal = wide_weights[i].iter().copied().sum();
                if wide_total.is_zero() {
                    return Err(EclError::InsufficientData {
                        state: state.id.clone(),
                        reason: format!(
                            "no outgoing transitions even in the {wider_lookback_months}-month fallback window"
                        ),
                    });
                }
                probabilities[i] = normalise(&wide_weights[i], wide_total);
            }
        }
        warn!(state = %state.id, policy = ?config.fallback, "transition row filled by fallback policy");
        fallback_rows.push(state.id.clone());
    }

    let matrix = TransitionMatrix {
        states: space.ids(),
        probabilities,
    };
    let quality = matrix.validate(space)?;

    Ok(EstimatedMatrix {
        frequency,
        matrix,
        quality,
        row_observations: counts,
        fallback_rows,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normalise(row: &[Decimal], total: Decimal) -> Vec<Decimal> {
    row.iter().map(|w| w / total).collect()
}

/// How many observation steps make up one period of `target`.
fn step_ratio(base: Frequency, target: Frequency) -> EclResult<u32> {
    let (b, t) = (base.months(), target.months());
    if t < b || t % b != 0 {
        return Err(EclError::InvalidInput {
            field: "frequencies".into(),
            reason: format!("Cannot build a {target} matrix from {base} observations"),
        });
    }
    Ok(t / b)
}

/// Weighted (from, to) counts for chained `steps`-period transitions whose
/// starting snapshot lies in (as_of - lookback, as_of].
fn count_transitions(
    observations: &[Observation],
    space: &StateSpace,
    as_of: NaiveDate,
    lookback_months: u32,
    steps: u32,
    config: &EstimationConfig,
) -> EclResult<(Vec<Vec<Decimal>>, Vec<u64>)> {
    let n = space.len();
    let window_start = as_of
        .checked_sub_months(Months::new(lookback_months))
        .ok_or_else(|| EclError::InvalidInput {
            field: "lookback_months".into(),
            reason: "Lookback window starts before the supported date range".into(),
        })?;
    let step_months = Months::new(config.observation_frequency.months());

    let mut by_entity: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        if config.excluded_targets.iter().any(|t| t == &obs.to_state) {
            continue;
        }
        space.require_index(&obs.from_state, "observations.from_state")?;
        space.require_index(&obs.to_state, "observations.to_state")?;
        if obs.period > window_start && obs.period <= as_of {
            by_entity.entry(obs.entity_id.as_str()).or_default().push(obs);
        }
    }

    let mut weights = vec![vec![Decimal::ZERO; n]; n];
    let mut counts = vec![0u64; n];

    for history in by_entity.values_mut() {
        history.sort_by_key(|o| o.period);
        let mut i = 0;
        while i < history.len() {
            let first = history[i];
            let mut current = first.to_state.as_str();
            let mut last = i;
            let mut taken = 1;
            let mut complete = true;
            while taken < steps && !is_absorbing(space, current) {
                let next = match history.get(last + 1) {
                    Some(o) => *o,
                    None => {
                        complete = false;
                        break;
                    }
                };
                let expected = history[last].period.checked_add_months(step_months);
                if Some(next.period) != expected || next.from_state != current {
                    complete = false;
                    break;
                }
                current = next.to_state.as_str();
                last += 1;
                taken += 1;
            }
            if complete {
                let from = space.require_index(&first.from_state, "observations.from_state")?;
                let to = space.require_index(current, "observations.to_state")?;
                weights[from][to] += observation_weight(first, config)?;
                counts[from] += 1;
            }
            i = last + 1;
        }
    }

    Ok((weights, counts))
}

fn is_absorbing(space: &StateSpace, id: &str) -> bool {
    space.state(id).is_some_and(|s| s.absorbing)
}

fn observation_weight(obs: &Observation, config: &EstimationConfig) -> EclResult<Decimal> {
    match config.weighting {
        Weighting::Count => Ok(Decimal::ONE),
        Weighting::Balance => match obs.balance {
            Some(b) if b >= Decimal::ZERO => Ok(b),
            Some(_) => Err(EclError::InvalidInput {
                field: "observations.balance".into(),
                reason: format!("Negative balance for entity '{}'", obs.entity_id),
            }),
            None => Err(EclError::InvalidInput {
                field: "observations.balance".into(),
                reason: format!(
                    "Balance weighting requires a balance for entity '{}' at {}",
                    obs.entity_id, obs.period
                ),
            }),
        },
    }
}

fn validate_config(config: &EstimationConfig) -> EclResult<()> {
    if config.lookback_months == 0 {
        return Err(EclError::InvalidInput {
            field: "lookback_months".into(),
            reason: "Lookback window must be at least one month".into(),
        });
    }
    if config.frequencies.is_empty() {
        return Err(EclError::InvalidInput {
            field: "frequencies".into(),
            reason: "At least one estimation frequency is required".into(),
        });
    }
    if let FallbackPolicy::CarryForward {
        wider_lookback_months,
    } = config.fallback
    {
        if wider_lookback_months <= config.lookback_months {
            return Err(EclError::InvalidInput {
                field: "fallback.wider_lookback_months".into(),
                reason: "Fallback window must be wider than the lookback window".into(),
            });
        }
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
    use crate::types::ROW_SUM_TOLERANCE;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

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

    fn obs(entity: &str, period: NaiveDate, from: &str, to: &str) -> Observation {
        Observation {
            entity_id: entity.into(),
            segment: None,
            period,
            from_state: from.into(),
            to_state: to.into(),
            balance: None,
        }
    }

    fn sample_book() -> Vec<Observation> {
        let mut book = Vec::new();
        // 8 stay performing, 1 slips to stage 2, 1 defaults
        for e in 0..8 {
            book.push(obs(&format!("p{e}"), date(2024, 6), "stage_1", "stage_1"));
        }
        book.push(obs("s", date(2024, 6), "stage_1", "stage_2"));
        book.push(obs("d", date(2024, 6), "stage_1", "stage_3"));
        // stage 2: 2 cure, 1 stays, 1 defaults
        book.push(obs("c1", date(2024, 6), "stage_2", "stage_1"));
        book.push(obs("c2", date(2024, 6), "stage_2", "stage_1"));
        book.push(obs("c3", date(2024, 6), "stage_2", "stage_2"));
        book.push(obs("c4", date(2024, 6), "stage_2", "stage_3"));
        // default noise must be ignored
        book.push(obs("x", date(2024, 6), "stage_3", "stage_1"));
        book
    }

    #[test]
    fn test_count_estimation() {
        let est = estimate_transition_matrix(
            &sample_book(),
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        )
        .unwrap();
        let p = &est.matrix.probabilities;
        assert_eq!(p[0], vec![dec!(0.8), dec!(0.1), dec!(0.1)]);
        assert_eq!(p[1], vec![dec!(0.5), dec!(0.25), dec!(0.25)]);
        assert_eq!(p[2], vec![dec!(0), dec!(0), dec!(1)]);
        assert_eq!(est.row_observations, vec![10, 4, 1]);
        assert!(est.fallback_rows.is_empty());
    }

    #[test]
    fn test_rows_sum_to_one() {
        let est = estimate_transition_matrix(
            &sample_book(),
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        )
        .unwrap();
        assert!(est.quality.max_row_deviation <= ROW_SUM_TOLERANCE);
    }

    #[test]
    fn test_balance_weighting() {
        let mut book = vec![
            obs("a", date(2024, 6), "stage_1", "stage_1"),
            obs("b", date(2024, 6), "stage_1", "stage_3"),
            obs("c", date(2024, 6), "stage_2", "stage_2"),
        ];
        book[0].balance = Some(dec!(300));
        book[1].balance = Some(dec!(100));
        book[2].balance = Some(dec!(50));
        let config = EstimationConfig {
            weighting: Weighting::Balance,
            ..EstimationConfig::default()
        };
        let est =
            estimate_transition_matrix(&book, &space(), date(2024, 12), Frequency::Monthly, &config)
                .unwrap();
        assert_eq!(est.matrix.probabilities[0][2], dec!(0.25));
    }

    #[test]
    fn test_balance_weighting_requires_balance() {
        let config = EstimationConfig {
            weighting: Weighting::Balance,
            ..EstimationConfig::default()
        };
        let result = estimate_transition_matrix(
            &sample_book(),
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &config,
        );
        assert!(matches!(result, Err(EclError::InvalidInput { .. })));
    }

    #[test]
    fn test_exit_rows_excluded() {
        let mut book = sample_book();
        book.push(obs("gone", date(2024, 6), "stage_1", "exit"));
        let est = estimate_transition_matrix(
            &book,
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        )
        .unwrap();
        assert_eq!(est.row_observations[0], 10);
    }

    #[test]
    fn test_unknown_state_rejected() {
        let mut book = sample_book();
        book.push(obs("z", date(2024, 6), "stage_1", "nowhere"));
        let result = estimate_transition_matrix(
            &book,
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_row_is_insufficient_data() {
        let book = vec![obs("a", date(2024, 6), "stage_1", "stage_1")];
        match estimate_transition_matrix(
            &book,
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        ) {
            Err(EclError::InsufficientData { state, .. }) => assert_eq!(state, "stage_2"),
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_uniform_row_fallback() {
        let book = vec![obs("a", date(2024, 6), "stage_1", "stage_1")];
        let config = EstimationConfig {
            fallback: FallbackPolicy::UniformRow,
            ..EstimationConfig::default()
        };
        let est =
            estimate_transition_matrix(&book, &space(), date(2024, 12), Frequency::Monthly, &config)
                .unwrap();
        assert_eq!(est.fallback_rows, vec!["stage_2".to_string()]);
        let row_sum: Decimal = est.matrix.probabilities[1].iter().copied().sum();
        assert!((row_sum - Decimal::ONE).abs() <= ROW_SUM_TOLERANCE);
    }

    #[test]
    fn test_carry_forward_fallback_uses_wider_window() {
        let book = vec![
            obs("a", date(2024, 6), "stage_1", "stage_1"),
            // only visible in the wider window
            obs("b", date(2020, 6), "stage_2", "stage_3"),
        ];
        let config = EstimationConfig {
            lookback_months: 12,
            fallback: FallbackPolicy::CarryForward {
                wider_lookback_months: 72,
            },
            ..EstimationConfig::default()
        };
        let est =
            estimate_transition_matrix(&book, &space(), date(2024, 12), Frequency::Monthly, &config)
                .unwrap();
        assert_eq!(est.matrix.probabilities[1][2], Decimal::ONE);
        assert_eq!(est.fallback_rows, vec!["stage_2".to_string()]);
    }

    #[test]
    fn test_carry_forward_still_empty_fails() {
        let book = vec![obs("a", date(2024, 6), "stage_1", "stage_1")];
        let config = EstimationConfig {
            lookback_months: 12,
            fallback: FallbackPolicy::CarryForward {
                wider_lookback_months: 24,
            },
            ..EstimationConfig::default()
        };
        let result =
            estimate_transition_matrix(&book, &space(), date(2024, 12), Frequency::Monthly, &config);
        assert!(matches!(result, Err(EclError::InsufficientData { .. })));
    }

    #[test]
    fn test_observations_outside_window_ignored() {
        let mut book = sample_book();
        book.push(obs("old", date(2019, 1), "stage_1", "stage_3"));
        book.push(obs("future", date(2025, 6), "stage_1", "stage_3"));
        let est = estimate_transition_matrix(
            &book,
            &space(),
            date(2024, 12),
            Frequency::Monthly,
            &EstimationConfig::default(),
        )
        .unwrap();
        assert_eq!(est.row_observations[0], 10);
    }

    #[test]
    fn test_quarterly_chains_monthly_snapshots() {
        let mut book = Vec::new();
        // stage_1 -> stage_2 -> stage_2 -> stage_1 over three months
        book.push(obs("q", date(2024, 1), "stage_1", "stage_2"));
        book.push(obs("q", date(2024, 2), "stage_2", "stage_2"));
        book.push(obs("q", date(2024, 3), "stage_2", "stage_1"));
        // defaults after one month: chain completes in the absorbing state
        book.push(obs("r", date(2024, 1), "stage_1", "stage_3"));
        // broken chain (gap) contributes nothing
        book.push(obs("g", date(2024, 1), "stage_2", "stage_2"));
        book.push(obs("g", date(2024, 3), "stage_2", "stage_2"));
        let est = estimate_transition_matrix(
            &book,
            &space(),
            date(2024, 12),
            Frequency::Quarterly,
            &EstimationConfig {
                fallback: FallbackPolicy::UniformRow,
                ..EstimationConfig::default()
            },
        )
        .unwrap();
        assert_eq!(est.frequency, Frequency::Quarterly);
        assert_eq!(est.row_observations[0], 2);
        assert_eq!(est.matrix.probabilities[0][0], dec!(0.5));
        assert_eq!(est.matrix.probabilities[0][2], dec!(0.5));
    }

    #[test]
    fn test_finer_target_frequency_rejected() {
        let config = EstimationConfig {
            observation_frequency: Frequency::Quarterly,
            frequencies: vec![Frequency::Monthly],
            ..EstimationConfig::default()
        };
        let result = estimate_transition_matrices(&sample_book(), &space(), date(2024, 12), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_one_matrix_per_frequency() {
        let config = EstimationConfig {
            frequencies: vec![Frequency::Monthly, Frequency::Quarterly],
            fallback: FallbackPolicy::UniformRow,
            ..EstimationConfig::default()
        };
        let out = estimate_transition_matrices(&sample_book(), &space(), date(2024, 12), &config)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].frequency, Frequency::Quarterly);
    }
}
