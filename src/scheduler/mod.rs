//! The orchestration scheduler: one background task that decides what the
//! display shows next and when.

mod actions;
mod runner;

pub use actions::{ActionOutcome, RefreshAction};
pub use runner::{Scheduler, SchedulerHandle};
