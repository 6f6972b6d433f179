use crate::error::{CareSheetError, Result};
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry schedule for rate-limited backend calls. Other errors are returned
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Wait used when the server did not suggest one.
    pub default_backoff: Duration,
    /// Added on top of a server-suggested wait.
    pub padding: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            default_backoff: Duration::from_secs(32),
            padding: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retries without waiting.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            default_backoff: Duration::ZERO,
            padding: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, error: &CareSheetError) -> Duration {
        match error {
            CareSheetError::RateLimited {
                retry_after: Some(wait),
                ..
            } => *wait + self.padding,
            _ => self.default_backoff,
        }
    }
}

pub async fn with_rate_limit_retry<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                let wait = policy.backoff_for(&e);
                warn!(
                    "Rate limited (attempt {}/{}), retrying in {:?}: {}",
                    attempt, max_attempts, wait, e
                );
                sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads a server-suggested wait from an error body: either `retry in 12.5s`
/// or a `"retryDelay": "32s"` field.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    if let Some(pos) = message.find("retry in ") {
        if let Some(secs) = leading_seconds(&message[pos + "retry in ".len()..]) {
            return Some(secs);
        }
    }
    let pos = message.find("\"retryDelay\"")?;
    let rest = &message[pos + "\"retryDelay\"".len()..];
    let quote = rest.find('"')?;
    leading_seconds(&rest[quote + 1..])
}

fn leading_seconds(text: &str) -> Option<Duration> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    if !text[end..].starts_with('s') {
        return None;
    }
    text[..end]
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
