#![forbid(unsafe_code)]

//! # caliper-harness
//!
//! Adaptive ability measurement for opaque text-generating services.
//!
//! Instead of running a fixed benchmark end to end, caliper-harness treats
//! each quality dimension as a latent ability and measures it with a
//! computerized adaptive test. A three-parameter IRT model scores every
//! candidate item by Fisher information at the current ability estimate,
//! the most informative item is executed against the target through a
//! pluggable backend, and a multi-criterion convergence controller stops
//! as soon as the estimate is precise enough. Replicated execution with a
//! coefficient-of-variation flag keeps noisy targets from polluting the
//! estimate.
//!
//! The engine is deliberately serial (one request in flight, one dimension
//! at a time) and produces per-dimension grades with confidence intervals
//! that collaborators persist and report.

pub mod adapter;
pub mod backend;
pub mod cat;
pub mod executor;
pub mod model;

pub use adapter::{
    AdapterError, HttpTargetAdapter, ReplyFormat, TargetAdapter, TargetConfig, TargetProbe,
    TargetReply,
};
pub use backend::{
    BackendCapabilities, BackendError, BackendHealth, BuiltinBackend, ExecutionBackend,
    SubprocessBackend, SubprocessConfig, TestResult, BUILTIN_BACKEND_ID,
};
pub use cat::{
    AbilityEstimate, CatSession, ConvergenceConfig, ConvergenceReason, DimensionEstimate,
    EstimationMethod, EstimatorConfig, RecordedResponse, SessionError, SessionSnapshot,
};
pub use executor::events::{EventBus, EventKind, ExecutorEvent};
pub use executor::noise::{NoiseConfig, NoiseIsolator, NoiseStats};
pub use executor::types::{
    ExecutionMetadata, ExecutionPlan, ExecutionResults, ExecutionStrategy, ExecutorConfig,
    ExecutorError,
};
pub use executor::AdaptiveExecutor;
pub use model::{Dimension, Evaluator, ItemParams, Role, TestInput, TestItem, Turn};
