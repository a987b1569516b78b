// Error kinds shared across the processing pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the job queue, handlers, and provider router.
///
/// These are kinds, not exhaustive causes: callers match on the variant to
/// decide propagation (see `Propagation policy` in the error handling
/// design), not on the message text.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller-fixable request shape (bad payload, unknown job type, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition on derived state was not met (e.g. lecture not ready).
    #[error("not ready: {0}")]
    NotReady(String),

    /// A shell runner (ffmpeg/ghostscript/libreoffice/pandoc/tectonic) exited non-zero.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// LLM backend transport or protocol error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The job's context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The per-job cost ceiling was crossed.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Transient storage contention (claim collision, pool exhaustion).
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Unknown provider tag in a routed model string.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Invariant violated; should not happen in correct operation.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PipelineError::InvalidInput(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        PipelineError::NotReady(msg.into())
    }

    pub fn external_tool(msg: impl Into<String>) -> Self {
        PipelineError::ExternalTool(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        PipelineError::Provider(msg.into())
    }

    pub fn budget_exceeded(msg: impl Into<String>) -> Self {
        PipelineError::BudgetExceeded(msg.into())
    }

    pub fn transient_storage(msg: impl Into<String>) -> Self {
        PipelineError::TransientStorage(msg.into())
    }

    pub fn unknown_provider(tag: impl Into<String>) -> Self {
        PipelineError::UnknownProvider(tag.into())
    }

    /// True for errors that the claim protocol should retry silently on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientStorage(_))
    }

    /// True when this error represents cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
