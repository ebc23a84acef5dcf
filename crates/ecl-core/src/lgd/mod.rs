pub mod collateral;
pub mod workout;

pub use collateral::{
    compute_lgd, CollateralItem, CollateralProfile, CureTreatment, LgdBreakdown, LgdConfig,
};
pub use workout::{workout_rates, ResolutionBalances, WorkoutRates};
