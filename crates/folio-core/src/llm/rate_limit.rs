//! Rate limiting and retry around LLM calls.
//!
//! Every call waits for a governor permit via `until_ready()`, which spaces
//! requests at the configured rate across all workers. On 429 the governor is
//! slowed, and the call is retried once after honoring `Retry-After`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::{LlmClient, LlmError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Seconds without a 429 before the base rate is restored.
const DECAY_SECS: u64 = 60;
const MAX_SLOWDOWN: u32 = 16;

/// Rate limiter with adaptive slow-down, swapped atomically via ArcSwap.
///
/// Each 429 doubles the period between requests (up to 16x). After 60s with
/// no 429, the original rate is restored.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl std::fmt::Debug for AdaptiveLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveLimiter")
            .field("base_period", &self.base_period)
            .field("factor", &self.factor())
            .finish()
    }
}

fn direct(period: Duration) -> Arc<DirectLimiter> {
    let period = period.max(Duration::from_millis(1));
    let quota =
        Quota::with_period(period).unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    Arc::new(DirectLimiter::direct(quota))
}

impl AdaptiveLimiter {
    /// Create a limiter with the given period between requests.
    pub fn new(period: Duration) -> Self {
        Self {
            limiter: ArcSwap::from(direct(period)),
            base_period: period.max(Duration::from_millis(1)),
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Create a limiter allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        let ms = 1000 / n.max(1) as u64;
        Self::new(Duration::from_millis(ms))
    }

    pub fn factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }

    /// Wait until the limiter allows a request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load_full();
        limiter.until_ready().await;
    }

    /// Called on a 429. Doubles the slow-down factor and swaps the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }
        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            });
        if let Some(scaled) = self.base_period.checked_mul(self.factor()) {
            self.limiter.store(direct(scaled));
        }
    }

    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed().as_secs() >= DECAY_SECS))
            .unwrap_or(false);

        if should_restore && self.factor() > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            self.limiter.store(direct(self.base_period));
            tracing::info!("LLM rate limit restored to base rate");
        }
    }
}

/// Map a 429 response to [`LlmError::RateLimited`], extracting `Retry-After`.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), LlmError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(LlmError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: use a conservative fixed wait rather than parsing it.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

async fn attempt(
    client: &dyn LlmClient,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(timeout, client.complete(prompt, max_tokens, temperature)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(timeout)),
    }
}

/// Call the model with governor rate limiting, a bounded timeout and one
/// retry on transient failure.
///
/// 1. Acquires the governor permit (waits if needed)
/// 2. Calls `client.complete()` under `timeout`
/// 3. On 429: slows the governor, waits `Retry-After` (capped at `timeout`)
/// 4. On any transient failure: retries once; a second failure is returned
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    limiter: Option<&AdaptiveLimiter>,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
) -> Result<String, LlmError> {
    if let Some(lim) = limiter {
        lim.acquire().await;
    }

    let err = match attempt(client, prompt, max_tokens, temperature, timeout).await {
        Ok(text) => return Ok(text),
        Err(e) if e.is_transient() => e,
        Err(e) => return Err(e),
    };

    let wait = match &err {
        LlmError::RateLimited { retry_after } => {
            if let Some(lim) = limiter {
                lim.on_rate_limited();
            }
            retry_after.unwrap_or(Duration::from_secs(2)).min(timeout)
        }
        // Short jittered pause so concurrent workers do not retry in lockstep.
        _ => Duration::from_millis(250 + fastrand::u64(0..500)),
    };
    tracing::info!(
        client = client.name(),
        error = %err,
        wait_secs = wait.as_secs_f64(),
        "transient LLM failure, retrying once"
    );
    tokio::time::sleep(wait).await;

    if let Some(lim) = limiter {
        lim.acquire().await;
    }
    attempt(client, prompt, max_tokens, temperature, timeout).await
}
