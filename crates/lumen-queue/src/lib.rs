pub mod handler;
pub mod queue;

pub use handler::{HandlerContext, JobHandler, ProgressReporter};
pub use queue::JobQueue;
