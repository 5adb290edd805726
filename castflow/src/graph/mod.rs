//! Pipeline graphs: named stages wired by static and conditional edges.
//!
//! A graph is assembled with [`GraphBuilder`], validated once by
//! [`GraphBuilder::compile`], and then run any number of times. Runs start
//! at the entry stage and stop when an edge leads to [`END`].

mod builder;
mod executor;
mod router;

pub use builder::{GraphBuilder, DEFAULT_MAX_TRANSITIONS};
pub use executor::{CompiledGraph, Edge};
pub use router::{ErrorRouter, FnRouter, Router};

/// The terminal marker; an edge to `END` finishes the run.
pub const END: &str = "__end__";
