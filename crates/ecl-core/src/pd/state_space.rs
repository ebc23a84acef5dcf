//! Credit state space.
//!
//! A finite, ordered set of credit states (performance buckets, delinquency
//! bands, default, closed). Every other PD component indexes matrices by the
//! position of a state in this space.

use serde::{Deserialize, Serialize};

use crate::error::EclError;
use crate::EclResult;

/// A single credit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditState {
    /// Identifier used in observations and exposures, e.g. "stage_1", "dpd_30", "default".
    pub id: String,
    /// Risk ordinal. Higher rank = riskier.
    pub rank: u32,
    /// No transitions out of this state once entered.
    #[serde(default)]
    pub absorbing: bool,
    /// Counts towards PD. Default states must also be absorbing.
    #[serde(default)]
    pub default: bool,
    /// Lowest days-past-due that falls into this bucket, if the state is a delinquency band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpd_floor: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpace {
    pub states: Vec<CreditState>,
}

impl StateSpace {
    /// Build and validate a state space.
    pub fn new(states: Vec<CreditState>) -> EclResult<Self> {
        let space = StateSpace { states };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> EclResult<()> {
        if self.states.len() < 2 {
            return Err(EclError::InvalidInput {
                field: "states".into(),
                reason: "A state space needs at least two states".into(),
            });
        }
        for (i, s) in self.states.iter().enumerate() {
            if self.states[..i].iter().any(|o| o.id == s.id) {
                return Err(EclError::InvalidInput {
                    field: "states".into(),
                    reason: format!("Duplicate state id '{}'", s.id),
                });
            }
            if s.default && !s.absorbing {
                return Err(EclError::MatrixValidation {
                    states: vec![s.id.clone()],
                    reason: "Default states must be absorbing".into(),
                });
            }
        }
        if !self.states.iter().any(|s| s.default) {
            return Err(EclError::MatrixValidation {
                states: self.ids(),
                reason: "At least one absorbing default state is required".into(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.states.iter().map(|s| s.id.clone()).collect()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.states.iter().position(|s| s.id == id)
    }

    /// Like `index_of`, but unknown ids are an input error.
    pub fn require_index(&self, id: &str, field: &str) -> EclResult<usize> {
        self.index_of(id).ok_or_else(|| EclError::InvalidInput {
            field: field.into(),
            reason: format!("Unknown credit state '{id}'"),
        })
    }

    pub fn state(&self, id: &str) -> Option<&CreditState> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn default_indices(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.default)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn absorbing_indices(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.absorbing)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_default(&self, id: &str) -> bool {
        self.state(id).is_some_and(|s| s.default)
    }

    /// Delinquency bucket for a days-past-due count: the band with the highest
    /// floor not exceeding `dpd`.
    pub fn state_for_dpd(&self, dpd: u32) -> Option<&CreditState> {
        self.states
            .iter()
            .filter(|s| s.dpd_floor.is_some_and(|f| f <= dpd))
            .max_by_key(|s| s.dpd_floor)
    }
}
