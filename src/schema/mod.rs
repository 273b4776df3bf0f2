//! Unified activity.raw_observation.v1 schema
//!
//! This module defines the input schema produced by the activity-capture
//! service: one record per foreground-window observation, delivered as a
//! JSON array or as newline-delimited JSON.

mod adapter;
mod raw_observation;

pub use adapter::*;
pub use raw_observation::*;
