//! Workpulse - Behavioral analytics engine for desktop activity
//!
//! Workpulse turns raw application/window observations into work sessions,
//! focus metrics and grounded recommendations through a deterministic
//! pipeline: normalization → sessionization → focus & switch analysis →
//! metrics aggregation → recommendations → insight assembly.
//!
//! ## Modules
//!
//! - **Pipeline**: `PeriodAnalyzer` runs one analysis period end to end
//! - **Store**: `EventSource` / `AnalyticsStore` interfaces with an in-memory implementation
//! - **Narrative**: Remote or template text generation with retry and fallback

pub mod categories;
pub mod config;
pub mod error;
pub mod focus;
pub mod insight;
pub mod logging;
pub mod metrics;
pub mod narrative;
pub mod normalizer;
pub mod pipeline;
pub mod recommendations;
pub mod schema;
pub mod sessionizer;
pub mod store;
pub mod types;

pub use categories::CategoryMap;
pub use config::PulseConfig;
pub use error::ComputeError;
pub use pipeline::{PeriodAnalyzer, PeriodReport};
pub use store::{AnalyticsStore, EventSource, MemoryStore, PageRequest};

// Schema exports
pub use schema::{ObservationAdapter, RawObservation, SCHEMA_VERSION};

// Model exports
pub use types::{
    ActivityObservation, AnalysisPeriod, BehavioralMetrics, ContextCategory, FocusPeriod,
    PeriodInsight, Recommendation, WorkSession,
};

/// Workpulse version embedded in CLI output
pub const WORKPULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "workpulse";
