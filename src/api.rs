use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::RetrySettings;
use crate::rate_limit::{RateLimiter, Sleeper, thread_sleeper};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited by api")]
    RateLimited { retry_after: Option<Duration> },
    #[error("graphql errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::RateLimited { .. } => true,
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::GraphQl(_) | ApiError::Decode(_) => false,
        }
    }

    /// Errors that will repeat for every request of the run, such as a rejected token.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Http { status: 401 | 403, .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub trait GraphQlTransport {
    /// Runs one query and returns the response's `data` member.
    fn execute(&mut self, query: &str, variables: &Value) -> Result<Value, ApiError>;
}

pub struct HttpTransport {
    client: &'static Client,
    url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(client: &'static Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token: token.into(),
        }
    }
}

impl GraphQlTransport for HttpTransport {
    fn execute(&mut self, query: &str, variables: &Value) -> Result<Value, ApiError> {
        let body = json!({ "query": query, "variables": variables });
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ApiError::RateLimited { retry_after });
        }

        let text = resp
            .text()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: truncate(&text, 300),
            });
        }
        parse_graphql_response(&text)
    }
}

/// Splits a GraphQL envelope into its `data`, or the error messages when no data came back.
pub fn parse_graphql_response(raw: &str) -> Result<Value, ApiError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|err| ApiError::Decode(err.to_string()))?;

    let messages = value
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if messages
        .iter()
        .any(|m| m.to_ascii_lowercase().contains("rate limit"))
    {
        return Err(ApiError::RateLimited { retry_after: None });
    }

    match value.get("data") {
        Some(data) if !data.is_null() => {
            if !messages.is_empty() {
                tracing::warn!(errors = ?messages, "partial graphql response");
            }
            Ok(data.clone())
        }
        _ if !messages.is_empty() => Err(ApiError::GraphQl(messages)),
        _ => Err(ApiError::Decode("response has neither data nor errors".to_string())),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallStats {
    pub calls: usize,
    pub retries: usize,
    pub rate_limit_wait: Duration,
}

pub struct ApiClient<T> {
    transport: T,
    limiter: RateLimiter,
    retry: RetrySettings,
    sleep: Sleeper,
    stats: CallStats,
}

impl<T: GraphQlTransport> ApiClient<T> {
    pub fn new(transport: T, limiter: RateLimiter, retry: RetrySettings) -> Self {
        Self::with_sleeper(transport, limiter, retry, thread_sleeper())
    }

    pub fn with_sleeper(
        transport: T,
        limiter: RateLimiter,
        retry: RetrySettings,
        sleep: Sleeper,
    ) -> Self {
        Self {
            transport,
            limiter,
            retry,
            sleep,
            stats: CallStats::default(),
        }
    }

    pub fn stats(&self) -> CallStats {
        self.stats
    }

    /// Every attempt, retries included, passes through the rate limiter.
    pub fn call(&mut self, query: &str, variables: &Value) -> Result<Value, ApiError> {
        let mut attempt = 0u32;
        loop {
            self.stats.rate_limit_wait += self.limiter.acquire();
            self.stats.calls += 1;
            match self.transport.execute(query, variables) {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    self.stats.retries += 1;
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| backoff_delay(&self.retry, attempt));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "api call failed, retrying"
                    );
                    (self.sleep)(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn backoff_delay(retry: &RetrySettings, attempt: u32) -> Duration {
    let base = retry.base_delay.saturating_mul(attempt);
    let jitter_cap = (retry.base_delay.as_millis() as u64 / 2).max(1);
    let jitter = rand::thread_rng().gen_range(0..jitter_cap);
    base + Duration::from_millis(jitter)
}

/// Ids arrive as numbers or numeric strings depending on the field.
pub fn as_u64_any(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<u64>().ok()
}

pub fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<i64>().ok()
}

fn truncate(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let mut out = raw.chars().take(max_chars).collect::<String>();
    out.push('…');
    out
}
