pub mod error;
pub mod time_value;
pub mod types;

#[cfg(feature = "pd")]
pub mod pd;

#[cfg(feature = "lgd")]
pub mod lgd;

#[cfg(feature = "ead")]
pub mod ead;

#[cfg(feature = "ecl")]
pub mod ecl;

#[cfg(feature = "ecl")]
pub mod config;

pub use error::EclError;
pub use types::*;

/// Standard result type for all ECL operations
pub type EclResult<T> = Result<T, EclError>;
