// Cost/Budget Guard: wraps a handler's running LLM usage, checks the
// ceiling after every chunk, and cancels the handler's own context the
// moment it's crossed rather than waiting for the stream to finish.

use lumen_core::config::BudgetConfig;
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::UsageMetrics;
use lumen_providers::ChatChunk;
use tokio_util::sync::CancellationToken;

/// Accumulates usage across however many LLM calls a handler makes and
/// enforces `max_cost_per_job_usd` between them. One instance per job run.
pub struct BudgetGuard {
    config: BudgetConfig,
    cancel: CancellationToken,
    usage: UsageMetrics,
}

impl BudgetGuard {
    pub fn new(config: BudgetConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            usage: UsageMetrics::default(),
        }
    }

    /// Folds one chunk's usage into the running total and checks the
    /// ceiling. Call after every chunk of every LLM call a handler makes,
    /// not just at call boundaries — a single call can overshoot mid-stream.
    pub fn record_chunk(&mut self, chunk: &ChatChunk) -> Result<()> {
        self.usage.input_tokens += i64::from(chunk.input_tokens);
        self.usage.output_tokens += i64::from(chunk.output_tokens);
        self.usage.cost_usd += chunk.cost;
        self.check()
    }

    fn check(&self) -> Result<()> {
        if self.config.is_enabled() && self.usage.cost_usd > self.config.max_cost_per_job_usd {
            self.cancel.cancel();
            return Err(PipelineError::budget_exceeded(format!(
                "accumulated cost {:.4} exceeds ceiling {:.4}",
                self.usage.cost_usd, self.config.max_cost_per_job_usd
            )));
        }
        Ok(())
    }

    pub fn usage(&self) -> UsageMetrics {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(cost: f64) -> ChatChunk {
        ChatChunk {
            input_tokens: 10,
            output_tokens: 10,
            cost,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_budget_never_cancels() {
        let cancel = CancellationToken::new();
        let mut guard = BudgetGuard::new(BudgetConfig::default(), cancel.clone());
        assert!(guard.record_chunk(&chunk(1_000_000.0)).is_ok());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn exceeding_ceiling_cancels_and_fails() {
        let cancel = CancellationToken::new();
        let config = BudgetConfig {
            max_cost_per_job_usd: 1.0,
        };
        let mut guard = BudgetGuard::new(config, cancel.clone());
        assert!(guard.record_chunk(&chunk(0.5)).is_ok());
        let result = guard.record_chunk(&chunk(0.6));
        assert!(matches!(result, Err(PipelineError::BudgetExceeded(_))));
        assert!(cancel.is_cancelled());
    }
}
