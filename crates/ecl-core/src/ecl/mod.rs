pub mod context;
pub mod engine;
pub mod pipeline;
pub mod staging;

pub use context::{EclContext, SegmentParameters};
pub use engine::{evaluate_exposure, run_ecl, EclRunOutput, Exposure, ExposureEcl};
pub use pipeline::{run_impairment, ImpairmentInput, ImpairmentOutput};
pub use staging::{next_stage, Stage, StagingObservation, StagingRules};
