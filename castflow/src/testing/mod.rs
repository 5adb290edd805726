//! Testing utilities for castflow pipelines.
//!
//! This module provides:
//! - Scripted collaborators that fail a set number of times
//! - Recording, failing and slow stages
//! - Assertions over pipeline state

mod assertions;
mod mocks;

pub use assertions::{assert_error_contains, assert_field, assert_missing, assert_no_error, json_map};
pub use mocks::{FailingStage, RecordingStage, Reply, ScriptedCollaborator, SlowStage};
