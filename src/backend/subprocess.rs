//! Sub-process backend bridging external evaluator tools.
//!
//! The target reply and the item are written to a unique per-test scratch
//! directory, the configured command is invoked with that directory as its
//! final argument, and its stdout is parsed as a `{passed, score}` JSON
//! verdict. Scratch files are removed when the guard drops, on success and
//! failure alike. A non-zero exit status is a hard error carrying the
//! stderr tail.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{BackendCapabilities, BackendError, BackendHealth, ExecutionBackend, TestResult};
use crate::adapter::TargetAdapter;
use crate::model::{Dimension, TestItem};

/// Bytes of stderr preserved in a failure.
const STDERR_TAIL_BYTES: usize = 512;

/// Name of the reply file inside the scratch directory.
pub const REPLY_FILE: &str = "reply.txt";

/// Name of the serialized item inside the scratch directory.
pub const ITEM_FILE: &str = "item.json";

/// Settings for one external evaluator tool.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Backend id referenced by `preferred_backends`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Executable to invoke.
    pub command: String,
    /// Leading arguments; the scratch directory path is appended last.
    pub args: Vec<String>,
    /// Dimensions the tool knows how to judge.
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Deserialize)]
struct ToolVerdict {
    passed: bool,
    score: f64,
    #[serde(default)]
    metrics: HashMap<String, f64>,
}

/// Backend that shells out to an external judging tool.
#[derive(Debug)]
pub struct SubprocessBackend {
    config: SubprocessConfig,
}

impl SubprocessBackend {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn supported_dimensions(&self) -> &[Dimension] {
        &self.config.dimensions
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_replications: true,
            ..BackendCapabilities::default()
        }
    }

    async fn healthcheck(&self) -> BackendHealth {
        // Spawnability is the availability signal; many tools exit non-zero
        // on --version yet run fine.
        match Command::new(&self.config.command)
            .arg("--version")
            .output()
            .await
        {
            Ok(output) => {
                let version = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty());
                BackendHealth {
                    available: true,
                    version,
                    error: None,
                }
            }
            Err(err) => BackendHealth::down(format!("{}: {err}", self.config.command)),
        }
    }

    async fn execute(
        &self,
        item: &TestItem,
        adapter: &dyn TargetAdapter,
    ) -> Result<TestResult, BackendError> {
        let start = Instant::now();
        let reply = adapter.send(&item.input).await?;

        let scratch = tempfile::TempDir::new()?;
        tokio::fs::write(scratch.path().join(REPLY_FILE), &reply.content).await?;
        let item_json = serde_json::to_vec(item)
            .map_err(|e| BackendError::Output(format!("item serialization failed: {e}")))?;
        tokio::fs::write(scratch.path().join(ITEM_FILE), item_json).await?;

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(scratch.path())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Subprocess {
                status: output.status.code().unwrap_or(-1),
                stderr_tail: tail(&stderr, STDERR_TAIL_BYTES),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdict: ToolVerdict = serde_json::from_str(stdout.trim())
            .map_err(|e| BackendError::Output(format!("{e}: {}", tail(&stdout, 128))))?;

        let mut metrics = verdict.metrics;
        metrics.insert("latency_ms".to_string(), reply.latency_ms as f64);

        Ok(TestResult {
            item_id: item.id.clone(),
            backend_id: self.config.id.clone(),
            passed: verdict.passed,
            score: verdict.score.clamp(0.0, 1.0),
            metrics,
            raw_output: reply.content,
            duration_ms: start.elapsed().as_millis() as u64,
            metadata: HashMap::new(),
        })
    }
}

fn tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.trim_end().to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let long = "a".repeat(600) + "END";
        let t = tail(&long, 16);
        assert!(t.ends_with("END"));
        assert!(t.len() <= 16);
    }

    #[test]
    fn verdict_parses_with_optional_metrics() {
        let v: ToolVerdict = serde_json::from_str(r#"{"passed":true,"score":0.75}"#).unwrap();
        assert!(v.passed);
        assert!(v.metrics.is_empty());

        let v: ToolVerdict = serde_json::from_str(
            r#"{"passed":false,"score":0.2,"metrics":{"toxicity":0.9}}"#,
        )
        .unwrap();
        assert_eq!(v.metrics["toxicity"], 0.9);
    }
}
