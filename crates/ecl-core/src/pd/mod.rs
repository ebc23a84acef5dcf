pub mod estimation;
pub mod macro_adjustment;
pub mod matrix;
pub mod state_space;
pub mod term_structure;

pub use matrix::TransitionMatrix;
pub use state_space::{CreditState, StateSpace};
pub use term_structure::{PdPoint, TermStructure, TermStructureGenerator};
