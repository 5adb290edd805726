//! Run lifecycle: records, the registry that executes them, and storage.

mod record;
mod registry;
mod store;

pub use record::{RunFilter, RunRecord, StepAttempt, StepOutcome};
pub use registry::RunRegistry;
pub use store::{InMemoryRunStore, JsonFileRunStore, RunStore};

#[cfg(test)]
pub use store::MockRunStore;
