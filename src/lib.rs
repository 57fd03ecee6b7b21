//! Growth Flux - Kalman-filter growth scoring for student behavioral tags
//!
//! Flux turns a sparse, irregularly timed stream of teacher-logged tags into a
//! per-(student, tag) estimate of the current behavioral level and its trend:
//! tag signing → Kalman state estimation → aggregation / prediction → report.
//!
//! ## Modules
//!
//! - **Estimator**: two-state (level, trend) Kalman filter tuned by a `ConfigProfile`
//! - **Aggregate / Predict**: dashboard summaries and forward extrapolation
//! - **Pipeline**: recompute and incremental entry points plus a stateful processor

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregate::{aggregate, GrowthSummary};
pub use catalog::TagCatalog;
pub use config::ConfigProfile;
pub use error::ScoreError;
pub use estimator::KalmanEstimator;
pub use pipeline::{apply_observation, compute_state, GrowthProcessor};
pub use predict::{forecast, predict, Prediction};
pub use report::{GrowthReport, ReportEncoder};
pub use store::{ObservationLog, ObservationSource, StateStore};
pub use types::{
    Observation, RawObservation, Sentiment, StudentId, TagFilterState, TagId, TagMeta,
    TrendDirection,
};

/// Growth Flux version embedded in all reports
pub const GROWTH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "growth-flux";
