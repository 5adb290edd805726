//! Per-run execution context handed to every stage.
//!
//! This module provides:
//! - `RunContext`, the run id, cancellation token, journal and event sink
//! - `RunJournal`, where the executor and retry wrapper record progress

mod journal;
mod run;

pub use journal::{MemoryJournal, NoopJournal, RunJournal};
pub use run::RunContext;
