/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, used for lookups that run under the inbox deadline.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }
}

/// Sends the request built by `build`, retrying transport errors, 429 and 5xx.
/// The last response is returned as-is even if it is still an error status.
pub async fn send_with_retry<F>(mut build: F, policy: RetryPolicy) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = policy.attempts.clamp(1, 5);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        let last = attempt >= max_attempts;
        match build().send().await {
            Ok(resp) if last || !should_retry_status(resp.status()) => return Ok(resp),
            Ok(resp) => debug!(status = %resp.status(), attempt, "retrying request"),
            Err(e) if last => return Err(e.into()),
            Err(e) => debug!(error = %e, attempt, "retrying request"),
        }
        sleep_with_jitter(backoff).await;
        backoff = backoff.saturating_mul(2).min(policy.max_backoff);
        attempt += 1;
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
