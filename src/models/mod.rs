// Domain models

mod location;
mod reading;
mod task_run;

pub use location::{Location, NewLocation};
pub use reading::{AggregatedReading, InsertOutcome, MeasureData, RawReading, SortOrder};
pub use task_run::{JobState, TaskRun, TaskStatus};
