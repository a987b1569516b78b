pub mod config;
pub mod error;
pub mod job;
pub mod readiness;

pub use error::{PipelineError, Result};
pub use job::{Job, JobFilter, JobStatus, JobType, JobUpdate, UsageMetrics};
