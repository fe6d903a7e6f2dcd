//! Job dispatch: queueing, lifecycle, and the worker pipeline.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{ExhaustedJob, JobStatus, ScanJob};
pub use queue::JobQueue;
pub use worker::WorkerPool;
