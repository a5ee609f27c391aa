//! Background job execution: one active job at a time, with progress,
//! cancellation and timeouts.

pub mod context;
pub mod job;
pub mod progress;
pub mod registry;

pub use context::JobContext;
pub use job::{FailureKind, Job, JobFailure, JobId, JobStatus, Termination, WorkError, WorkResult};
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter};
pub use registry::{JobHandle, JobOptions, JobRegistry};
