//! Broadcasting of job events for real-time streaming.
//!
//! Used by the in-process transport and by any desktop event bridge that
//! forwards events to a front end.

pub mod job_progress;

pub use job_progress::{JobEvent, JobMessage, JobProgressBroadcaster, JobProgressEvent, JobSubscription};
