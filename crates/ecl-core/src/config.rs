//! Run configuration.
//!
//! Every section and field is defaulted, so an empty document is a valid
//! configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ead::EadConfig;
use crate::ecl::staging::StagingRules;
use crate::error::EclError;
use crate::lgd::LgdConfig;
use crate::pd::estimation::EstimationConfig;
use crate::pd::macro_adjustment::MacroConfig;
use crate::types::Rate;
use crate::EclResult;

/// Source of the rate used to discount expected losses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscountRateSource {
    /// Each exposure's effective interest rate, falling back to its
    /// contractual rate.
    #[default]
    EffectiveInterestRate,
    /// One annual rate for every exposure.
    Flat { annual_rate: Rate },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EclConfig {
    pub estimation: EstimationConfig,
    pub staging: StagingRules,
    pub macro_adjustment: MacroConfig,
    pub lgd: LgdConfig,
    pub ead: EadConfig,
    pub discount: DiscountRateSource,
}

impl EclConfig {
    pub fn from_json(json: &str) -> EclResult<Self> {
        let config: EclConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that cut across sections; the individual components validate
    /// their own parameters when used.
    pub fn validate(&self) -> EclResult<()> {
        if self.staging.default_dpd < self.staging.backstop_dpd {
            return Err(EclError::InvalidInput {
                field: "staging.default_dpd".into(),
                reason: format!(
                    "Default threshold ({}) must not be below the SICR backstop ({})",
                    self.staging.default_dpd, self.staging.backstop_dpd
                ),
            });
        }
        if let DiscountRateSource::Flat { annual_rate } = self.discount {
            if annual_rate <= -Decimal::ONE {
                return Err(EclError::InvalidInput {
                    field: "discount.annual_rate".into(),
                    reason: "Rate must be greater than -100%".into(),
                });
            }
        }
        self.ead.validate()?;
        if self.estimation.frequencies.is_empty() {
            return Err(EclError::InvalidInput {
                field: "estimation.frequencies".into(),
                reason: "At least one estimation frequency is required".into(),
            });
        }
        Ok(())
    }
}
