//! Shared HTTP plumbing for peer-to-peer calls.
//!
//! Outbound requests go through a `RetryPolicy`: each attempt carries the
//! per-call deadline, and failed attempts wait out an exponentially growing,
//! jittered delay so a flapping peer is not hammered in lockstep by all of
//! its callers.

use std::time::Duration;

use anyhow::Result;
use axum::Json;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How one logical request behaves across transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Deadline applied to each individual attempt.
    pub timeout: Duration,
    /// Total attempts, the first one included.
    pub attempts: u32,
}

impl RetryPolicy {
    pub const fn new(timeout: Duration, attempts: u32) -> Self {
        Self { timeout, attempts }
    }

    /// Delay before retry number `retry` (0-based): 100ms doubling per
    /// retry, capped at 2s, stretched by up to a quarter of jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(100).saturating_mul(1 << retry.min(4));
        let capped = base.min(Duration::from_secs(2));
        capped + capped.mul_f64(rand::thread_rng().gen_range(0.0..0.25))
    }
}

async fn send_with_retry<F>(policy: RetryPolicy, build: F) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error = None;
    for attempt in 0..policy.attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt - 1)).await;
        }
        match build().timeout(policy.timeout).send().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                tracing::debug!(error = %e, attempt, "request attempt failed");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(anyhow::anyhow!(e)),
        None => Err(anyhow::anyhow!("retry policy allows no attempts")),
    }
}

pub async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
    policy: RetryPolicy,
) -> Result<reqwest::Response> {
    send_with_retry(policy, || client.post(url).json(payload)).await
}

pub async fn get_with_retry(
    client: &reqwest::Client,
    url: &str,
    policy: RetryPolicy,
) -> Result<reqwest::Response> {
    send_with_retry(policy, || client.get(url)).await
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// `GET /health` on every process.
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_stays_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        for retry in 0..8 {
            let delay = policy.backoff(retry);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(2500));
        }
        assert!(policy.backoff(1) >= Duration::from_millis(200));
        assert!(policy.backoff(2) >= Duration::from_millis(400));
    }
}
