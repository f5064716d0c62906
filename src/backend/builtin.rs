//! Built-in evaluator backend.
//!
//! Sends the item input through the adapter and judges the reply with the
//! item's declared evaluator predicates. Dispatch is a match over the
//! closed [`Evaluator`] sum type.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::{
    BackendCapabilities, BackendError, BackendHealth, ExecutionBackend, TestResult,
    BUILTIN_BACKEND_ID,
};
use crate::adapter::TargetAdapter;
use crate::model::{Dimension, Evaluator, TestItem};

/// Replies at or below this trimmed length fail the heuristic judge.
const LLM_JUDGE_MIN_LEN: usize = 10;

/// Surrounding triple-backtick fence, optional language tag.
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A```[A-Za-z0-9_-]*\r?\n?(.*?)\r?\n?```\z").expect("static pattern")
});

/// Evaluator-driven backend over the target adapter.
#[derive(Debug, Default)]
pub struct BuiltinBackend;

impl BuiltinBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionBackend for BuiltinBackend {
    fn id(&self) -> &str {
        BUILTIN_BACKEND_ID
    }

    fn name(&self) -> &str {
        "Built-in evaluator backend"
    }

    fn supported_dimensions(&self) -> &[Dimension] {
        &Dimension::ALL
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_replications: true,
            supports_streaming: false,
            supports_multimodal: false,
            supports_multi_turn: true,
        }
    }

    async fn healthcheck(&self) -> BackendHealth {
        BackendHealth::up(env!("CARGO_PKG_VERSION"))
    }

    async fn execute(
        &self,
        item: &TestItem,
        adapter: &dyn TargetAdapter,
    ) -> Result<TestResult, BackendError> {
        let start = Instant::now();
        let reply = adapter.send(&item.input).await?;

        let total = item.evaluators.len();
        let passed_count = item
            .evaluators
            .iter()
            .filter(|ev| evaluate(ev, &reply.content))
            .count();
        // An item with nothing to check cannot pass.
        let (passed, score) = if total == 0 {
            (false, 0.0)
        } else {
            (passed_count == total, passed_count as f64 / total as f64)
        };

        let mut metrics = HashMap::new();
        metrics.insert("latency_ms".to_string(), reply.latency_ms as f64);
        metrics.insert("evaluators_total".to_string(), total as f64);
        metrics.insert("evaluators_passed".to_string(), passed_count as f64);

        let mut metadata = HashMap::new();
        metadata.insert(
            "reply_format".to_string(),
            serde_json::json!(reply.format),
        );

        Ok(TestResult {
            item_id: item.id.clone(),
            backend_id: BUILTIN_BACKEND_ID.to_string(),
            passed,
            score,
            metrics,
            raw_output: reply.content,
            duration_ms: start.elapsed().as_millis() as u64,
            metadata,
        })
    }
}

/// Apply one evaluator predicate to the reply text.
pub fn evaluate(evaluator: &Evaluator, text: &str) -> bool {
    match evaluator {
        Evaluator::Contains(needle) => contains_ci(text, needle),
        Evaluator::NotContains(needle) => !contains_ci(text, needle),
        Evaluator::Regex(pattern) => regex_matches(pattern, text),
        Evaluator::NotRegex(pattern) => !regex_matches(pattern, text),
        Evaluator::ScoreThreshold(_) => !text.trim().is_empty(),
        Evaluator::LlmJudge(_) => text.trim().len() > LLM_JUDGE_MIN_LEN,
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn regex_matches(pattern: &str, text: &str) -> bool {
    let stripped = strip_code_fences(text);
    match Regex::new(&format!("(?is){pattern}")) {
        Ok(re) => re.is_match(stripped),
        Err(err) => {
            warn!(pattern, error = %err, "invalid evaluator regex");
            false
        }
    }
}

/// Remove one surrounding triple-backtick fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match CODE_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    }
}
