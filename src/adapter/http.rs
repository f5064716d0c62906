//! HTTP adapter for chat-completion-shaped targets.
//!
//! Speaks plain JSON over POST: the item input becomes a `messages` array,
//! the reply is extracted from the common completion shapes with a raw-body
//! fallback. Transient failures retry with bounded exponential backoff and
//! capped jitter; everything else surfaces immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tokio::time::sleep;

use super::error::AdapterError;
use super::{expand_env, ReplyFormat, TargetAdapter, TargetConfig, TargetProbe, TargetReply};
use crate::model::{Role, TestInput};

/// Upper bound on a reply body (1 MiB); larger targets are misbehaving.
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Backoff never sleeps longer than this, jitter included.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// HTTP adapter over one POST endpoint.
#[derive(Debug, Clone)]
pub struct HttpTargetAdapter {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

impl HttpTargetAdapter {
    /// Build from a config, expanding `${VAR}` references in the url,
    /// headers, and auth token.
    pub fn new(config: &TargetConfig) -> Result<Self, AdapterError> {
        let url = expand_env(&config.url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(expand_env(name)?.as_bytes())
                .map_err(|_| AdapterError::Config(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(&expand_env(value)?)
                .map_err(|_| AdapterError::Config("invalid header value".to_string()))?;
            headers.insert(name, value);
        }
        if let Some(token) = &config.auth_token {
            let token = expand_env(token)?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| AdapterError::Config("invalid auth token format".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| AdapterError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            timeout,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    fn build_messages(input: &TestInput) -> WireRequest<'_> {
        let mut messages = Vec::with_capacity(input.history.len() + 2);
        if let Some(system) = &input.system_prompt {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        for turn in &input.history {
            messages.push(WireMessage {
                role: match turn.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &input.prompt,
        });
        WireRequest { messages }
    }

    async fn send_once(&self, input: &TestInput) -> Result<TargetReply, AdapterError> {
        let start = Instant::now();
        let wire = Self::build_messages(input);
        let mut response = self
            .client
            .post(&self.url)
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(self.timeout)
                } else {
                    AdapterError::from(e)
                }
            })?;

        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);

        // Stream the body so a runaway target cannot balloon memory.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_RESPONSE_LEN {
                return Err(AdapterError::Transport {
                    message: format!("response exceeds {MAX_RESPONSE_LEN} bytes"),
                    status: Some(status),
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).to_string();

        match status {
            200..=299 => {}
            401 | 403 => return Err(AdapterError::Auth(format!("HTTP {status}"))),
            429 => {
                return Err(AdapterError::Transport {
                    message: "rate limited".to_string(),
                    status: Some(429),
                })
            }
            400..=499 => {
                return Err(AdapterError::Protocol {
                    message: truncate_for_log(&body),
                    status,
                })
            }
            _ => {
                return Err(AdapterError::Transport {
                    message: format!("HTTP {status}"),
                    status: Some(status),
                })
            }
        }

        let (content, format) = extract_reply(&body, is_json)?;
        Ok(TargetReply {
            content,
            format,
            latency_ms: start.elapsed().as_millis() as u64,
            metadata: HashMap::new(),
        })
    }
}

#[async_trait]
impl TargetAdapter for HttpTargetAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        // Any HTTP answer means the endpoint is reachable; POST-only
        // targets commonly 404/405 a GET.
        self.client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn send(&self, input: &TestInput) -> Result<TargetReply, AdapterError> {
        let mut last_error: Option<AdapterError> = None;

        for attempt in 0..=self.max_retries {
            match self.send_once(input).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.retry_base_delay, attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying target request"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AdapterError::Transport {
            message: "retries exhausted".to_string(),
            status: None,
        }))
    }

    async fn inspect(&self) -> Result<TargetProbe, AdapterError> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(_) => return Ok(TargetProbe::default()),
        };

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let detected_provider = detect_provider(&self.url, &headers);
        let response_format = headers
            .get("content-type")
            .map(|ct| if ct.contains("json") { ReplyFormat::Json } else { ReplyFormat::Text });

        Ok(TargetProbe {
            reachable: true,
            response_format,
            detected_provider,
            headers,
        })
    }
}

/// Exponential backoff with capped jitter: `base · 2^attempt` plus up to a
/// quarter of that again, never beyond [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    let raw = base.saturating_mul(multiplier as u32);
    let jitter_cap = (raw / 4).as_millis() as u64;
    let jitter = if jitter_cap > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    } else {
        Duration::ZERO
    };
    (raw + jitter).min(MAX_RETRY_DELAY)
}

/// Pull the reply text out of the common completion shapes, falling back
/// to the raw body for plain-text targets.
fn extract_reply(body: &str, is_json: bool) -> Result<(String, ReplyFormat), AdapterError> {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

    let Some(value) = parsed else {
        if is_json {
            return Err(AdapterError::Parse(
                "content-type is JSON but body is not".to_string(),
            ));
        }
        return Ok((body.to_string(), classify_text(body)));
    };

    let extracted = value
        .pointer("/choices/0/message/content")
        .or_else(|| value.get("content"))
        .or_else(|| value.get("response"))
        .or_else(|| value.get("output"))
        .or_else(|| value.get("text"))
        .and_then(|v| v.as_str());

    match extracted {
        Some(text) => Ok((text.to_string(), classify_text(text))),
        // JSON without a recognizable text field (e.g. a bare classifier
        // verdict): hand the whole document to the evaluators.
        None => Ok((body.to_string(), ReplyFormat::Json)),
    }
}

fn classify_text(text: &str) -> ReplyFormat {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        ReplyFormat::Json
    } else if text.contains("```") || trimmed.starts_with('#') {
        ReplyFormat::Markdown
    } else {
        ReplyFormat::Text
    }
}

fn detect_provider(url: &str, headers: &HashMap<String, String>) -> Option<String> {
    const KNOWN: &[&str] = &["openai", "anthropic", "openrouter", "cohere", "mistral"];
    for candidate in KNOWN {
        if url.contains(candidate) {
            return Some((*candidate).to_string());
        }
    }
    headers.get("server").cloned()
}

fn truncate_for_log(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}
