// Process-wide configuration, loaded from environment variables with
// documented defaults via a `from_env()` associated function per struct,
// rather than a config-file parser (config loading proper is an external
// collaborator, out of scope for this core).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;

/// Tuning for the Job Queue worker pool.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Fixed-size worker pool (default 4).
    pub worker_count: usize,
    /// Worker loop tick interval (default 1s).
    pub tick_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LUMEN_QUEUE_WORKERS") {
            cfg.worker_count = v.parse().map_err(|_| {
                anyhow::anyhow!("LUMEN_QUEUE_WORKERS must be a positive integer, got {v}")
            })?;
        }
        if let Ok(v) = std::env::var("LUMEN_QUEUE_TICK_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("LUMEN_QUEUE_TICK_MS must be an integer, got {v}"))?;
            cfg.tick_interval = Duration::from_millis(ms);
        }
        Ok(cfg)
    }
}

/// Per-job cost ceiling enforced by the Cost/Budget Guard.
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    /// 0 disables the check.
    pub max_cost_per_job_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_cost_per_job_usd: 0.0,
        }
    }
}

impl BudgetConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LUMEN_MAX_COST_PER_JOB_USD") {
            cfg.max_cost_per_job_usd = v.parse().map_err(|_| {
                anyhow::anyhow!("LUMEN_MAX_COST_PER_JOB_USD must be a number, got {v}")
            })?;
        }
        Ok(cfg)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_cost_per_job_usd > 0.0
    }
}

/// Tunables for TRANSCRIBE_MEDIA / INGEST_DOCUMENTS fan-out.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    pub audio_chunk_length_seconds: u32,
    pub refining_batch_size: usize,
    pub segment_fanout: usize,
    pub render_dots_per_inch: u32,
    pub page_fanout: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            audio_chunk_length_seconds: 300,
            refining_batch_size: 3,
            segment_fanout: 5,
            render_dots_per_inch: 150,
            page_fanout: 5,
        }
    }
}

impl HandlerConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("LUMEN_AUDIO_CHUNK_SECONDS") {
            cfg.audio_chunk_length_seconds = v.parse()?;
        }
        if let Ok(v) = std::env::var("LUMEN_REFINING_BATCH_SIZE") {
            cfg.refining_batch_size = v.parse()?;
        }
        if let Ok(v) = std::env::var("LUMEN_SEGMENT_FANOUT") {
            cfg.segment_fanout = v.parse()?;
        }
        if let Ok(v) = std::env::var("LUMEN_RENDER_DPI") {
            cfg.render_dots_per_inch = v.parse()?;
        }
        if let Ok(v) = std::env::var("LUMEN_PAGE_FANOUT") {
            cfg.page_fanout = v.parse()?;
        }
        Ok(cfg)
    }
}

/// Resolves the per-purpose task names used throughout the handlers
/// (`content_polishing`, `documents_ingestion`, `outline_creation`,
/// `content_generation`, `content_verification`) to a `<tag>:<model>`
/// string the Provider Router can dispatch on, loaded as a small
/// env-driven table.
#[derive(Debug, Clone)]
pub struct TaskModelTable {
    models: HashMap<String, String>,
    default_model: String,
}

impl TaskModelTable {
    const DEFAULT_MODEL: &'static str = "openrouter:openai/gpt-4o-mini";

    pub fn from_env() -> Result<Self> {
        let default_model = std::env::var("LUMEN_DEFAULT_MODEL")
            .unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        let mut models = HashMap::new();
        for task in [
            "content_polishing",
            "documents_ingestion",
            "outline_creation",
            "content_generation",
            "content_verification",
        ] {
            let env_key = format!("LUMEN_TASK_MODEL_{}", task.to_uppercase());
            if let Ok(model) = std::env::var(&env_key) {
                models.insert(task.to_string(), model);
            }
        }
        Ok(Self {
            models,
            default_model,
        })
    }

    /// The model string to route a given task through (falls back to the
    /// configured default when the task has no override).
    pub fn resolve(&self, task: &str) -> &str {
        self.models
            .get(task)
            .map(|s| s.as_str())
            .unwrap_or(&self.default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_model_table_falls_back_to_default() {
        let table = TaskModelTable {
            models: HashMap::new(),
            default_model: "ollama:gemma:1b".to_string(),
        };
        assert_eq!(table.resolve("content_polishing"), "ollama:gemma:1b");
    }

    #[test]
    fn task_model_table_honors_override() {
        let mut models = HashMap::new();
        models.insert("content_polishing".to_string(), "openrouter:gpt-4o".to_string());
        let table = TaskModelTable {
            models,
            default_model: "ollama:gemma:1b".to_string(),
        };
        assert_eq!(table.resolve("content_polishing"), "openrouter:gpt-4o");
        assert_eq!(table.resolve("outline_creation"), "ollama:gemma:1b");
    }

    #[test]
    fn budget_disabled_at_zero() {
        let cfg = BudgetConfig {
            max_cost_per_job_usd: 0.0,
        };
        assert!(!cfg.is_enabled());
    }
}
