//! Retry/validate wrapper for collaborator steps.
//!
//! This module provides:
//! - `RetryConfig` and backoff strategies
//! - `Validator` quality gates and the default `QualityThresholds`
//! - `StepExecutor`, which combines both around a `Collaborator` call

mod executor;
mod policy;
mod validators;

pub use executor::StepExecutor;
pub use policy::{BackoffStrategy, RetryConfig, RetryDecision};
pub use validators::{
    FnValidator, MinItems, MinWordCount, QualityThresholds, Validator, ValidatorRegistry,
};
