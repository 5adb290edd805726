//! Core domain model types for castflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Pipeline state, typed keys and patches
//! - Run, step and schedule status enums

mod state;
mod status;

pub use state::{JsonMap, Patch, PipelineState, StateKey, ERROR_INFO};
pub use status::{RunStatus, ScheduleStatus, StepStatus};
