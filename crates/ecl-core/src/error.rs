use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EclError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data for state '{state}': {reason}")]
    InsufficientData { state: String, reason: String },

    #[error("Matrix validation failed for states [{}]: {reason}", states.join(", "))]
    MatrixValidation { states: Vec<String>, reason: String },

    #[error("Calibration error for states [{}]: {reason}", states.join(", "))]
    Calibration { states: Vec<String>, reason: String },

    #[error("Missing parameter for exposure '{exposure_id}': {parameter}")]
    MissingParameter {
        exposure_id: String,
        parameter: String,
    },

    #[error("Invalid exposure '{exposure_id}': {reason}")]
    InvalidExposure { exposure_id: String, reason: String },

    #[error("Schedule divergence for exposure '{exposure_id}': residual {residual} exceeds tolerance {tolerance}")]
    ScheduleDivergence {
        exposure_id: String,
        residual: Decimal,
        tolerance: Decimal,
    },

    #[error("Run cancelled after {completed} exposure evaluations")]
    Cancelled { completed: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EclError {
    /// Errors that exclude a single exposure rather than aborting the run.
    pub fn is_exposure_level(&self) -> bool {
        matches!(
            self,
            EclError::MissingParameter { .. }
                | EclError::InvalidExposure { .. }
                | EclError::ScheduleDivergence { .. }
        )
    }

    /// Short machine-readable tag used in exception reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EclError::InvalidInput { .. } => "invalid_input",
            EclError::InsufficientData { .. } => "insufficient_data",
            EclError::MatrixValidation { .. } => "matrix_validation",
            EclError::Calibration { .. } => "calibration",
            EclError::MissingParameter { .. } => "missing_parameter",
            EclError::InvalidExposure { .. } => "invalid_exposure",
            EclError::ScheduleDivergence { .. } => "schedule_divergence",
            EclError::Cancelled { .. } => "cancelled",
            EclError::SerializationError(_) => "serialization",
        }
    }
}

/// Re-attributes an input error raised while processing one exposure's own
/// terms to that exposure, so it is excluded instead of aborting the run.
pub(crate) fn scope_to_exposure(exposure_id: &str) -> impl Fn(EclError) -> EclError + '_ {
    move |e| match e {
        EclError::InvalidInput { field, reason } => EclError::InvalidExposure {
            exposure_id: exposure_id.to_string(),
            reason: format!("{field}: {reason}"),
        },
        other => other,
    }
}

impl From<serde_json::Error> for EclError {
    fn from(e: serde_json::Error) -> Self {
        EclError::SerializationError(e.to_string())
    }
}
