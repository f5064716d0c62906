//! Computerized adaptive testing core: IRT kernels, ability estimation,
//! item selection, stopping rule, and per-dimension session state.

pub mod convergence;
pub mod estimator;
pub mod irt;
pub mod selector;
pub mod session;

pub use convergence::{check, ConvergenceConfig, ConvergenceReason};
pub use estimator::{estimate, AbilityEstimate, EstimationMethod, EstimatorConfig};
pub use selector::{select_next, PRELIMINARY_DISCOUNT};
pub use session::{
    CatSession, DimensionEstimate, RecordedResponse, SessionError, SessionSnapshot,
};
