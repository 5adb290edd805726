//! Future-dated runs.
//!
//! The [`Scheduler`] holds pending [`ScheduleEntry`] values and hands each
//! one to a [`RunSubmitter`] once it is due. Entries leave the pending set
//! before they are submitted, so overlapping ticks never fire one twice.

mod entry;
mod pending;

pub use entry::{ScheduleEntry, ScheduleFilter};
pub use pending::{FiredSchedule, RunSubmitter, Scheduler, MIN_TICK_INTERVAL};
