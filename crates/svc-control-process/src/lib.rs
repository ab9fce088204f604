//! Named background jobs with start/abort lifecycle and schedule bindings.

pub mod registry;
pub mod schedule;

pub use registry::{
    JobContext, JobFn, ProcessInfo, ProcessRegistry, ProcessState, ProcessStateChanged,
};
pub use schedule::{CronRule, ScheduleBinding, ScheduleError, ScheduleSet, Scheduler};
