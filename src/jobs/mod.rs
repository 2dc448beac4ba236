pub mod boundary_resolution;
pub mod worker;

pub use boundary_resolution::{resolve_boundaries, NoopReason, ResolutionReport};
pub use worker::{EnqueueAck, JobSnapshot, JobStatus, ResolutionWorker, WorkerConfig, WorkerHandle};
