//! IFRS 9 stage allocation.
//!
//! A pure transition function over a tagged stage enum. Stage 2 carries the
//! number of consecutive periods the exposure has spent without a SICR
//! trigger, so probation is part of the state rather than a side table.

use serde::{Deserialize, Serialize};

/// IFRS 9 impairment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Stage1,
    Stage2 {
        #[serde(default)]
        probation_elapsed: u32,
    },
    /// Credit-impaired. Terminal for the default episode.
    Stage3,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Stage::Stage1 => 1,
            Stage::Stage2 { .. } => 2,
            Stage::Stage3 => 3,
        }
    }

    /// Stage 2 and 3 carry lifetime ECL.
    pub fn uses_lifetime(self) -> bool {
        !matches!(self, Stage::Stage1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingRules {
    /// Rank notches of deterioration since origination that signal SICR.
    pub sicr_rank_threshold: u32,
    /// Days past due beyond which SICR is presumed.
    pub backstop_dpd: u32,
    /// Days past due beyond which the exposure is credit-impaired.
    pub default_dpd: u32,
    /// Consecutive periods without SICR before a Stage 2 exposure cures.
    pub probation_periods: u32,
}

impl Default for StagingRules {
    fn default() -> Self {
        StagingRules {
            sicr_rank_threshold: 2,
            backstop_dpd: 30,
            default_dpd: 90,
            probation_periods: 3,
        }
    }
}

/// Credit information observed for one exposure at the valuation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingObservation {
    pub current_rank: u32,
    pub origination_rank: u32,
    pub days_past_due: u32,
    /// Current state is an absorbing default state.
    pub in_default: bool,
}

/// Significant increase in credit risk since origination.
pub fn is_sicr(obs: &StagingObservation, rules: &StagingRules) -> bool {
    obs.current_rank.saturating_sub(obs.origination_rank) >= rules.sicr_rank_threshold
        || obs.days_past_due > rules.backstop_dpd
}

/// Stage at this valuation date given the stage at the previous one.
/// `None` means no staging history, e.g. a newly originated exposure.
pub fn next_stage(previous: Option<Stage>, obs: &StagingObservation, rules: &StagingRules) -> Stage {
    if obs.in_default || obs.days_past_due > rules.default_dpd {
        return Stage::Stage3;
    }
    let sicr = is_sicr(obs, rules);
    match previous {
        Some(Stage::Stage3) => Stage::Stage3,
        None | Some(Stage::Stage1) => {
            if sicr {
                Stage::Stage2 {
                    probation_elapsed: 0,
                }
            } else {
                Stage::Stage1
            }
        }
        Some(Stage::Stage2 { probation_elapsed }) => {
            if sicr {
                Stage::Stage2 {
                    probation_elapsed: 0,
                }
            } else if probation_elapsed + 1 >= rules.probation_periods {
                Stage::Stage1
            } else {
                Stage::Stage2 {
                    probation_elapsed: probation_elapsed + 1,
                }
            }
        }
    }
}
