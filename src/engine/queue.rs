//! Process-wide queue in front of the upstream model API.
//!
//! Requests run one at a time in arrival order with a minimum spacing
//! between upstream calls. A request that is still rate limited after its
//! retry budget puts the whole queue into backoff and is retried in place,
//! bounded by the maximum queue wait.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ts_rs::TS;

use crate::config::QueueConfig;
use crate::error::AppError;

use super::llm::LlmError;
use super::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub min_interval: Duration,
    pub max_queue_size: usize,
    pub max_wait: Duration,
    pub max_backoff: Duration,
    pub retry: RetryPolicy,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_queue_size: config.max_queue_size,
            max_wait: Duration::from_secs(config.max_wait_secs),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            retry: RetryPolicy::from(config),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Waiting plus in-flight requests.
    pending: usize,
    processing: bool,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    last_request: Option<Instant>,
}

pub struct RequestQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    /// Tokio's mutex is fair, which gives FIFO ordering.
    gate: tokio::sync::Mutex<()>,
}

/// Snapshot for the queue-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueInfo {
    pub queue_length: usize,
    pub is_processing: bool,
    pub consecutive_failures: u32,
    /// Remaining global backoff, 0 when none.
    pub backoff_remaining_ms: u64,
    pub estimated_wait_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum QueueStatus {
    Ready,
    Processing,
    Normal,
    Busy,
    Overloaded,
}

impl QueueStatus {
    pub fn classify(info: &QueueInfo) -> Self {
        match info.queue_length {
            0 if info.is_processing => QueueStatus::Processing,
            0 => QueueStatus::Ready,
            1..=5 => QueueStatus::Normal,
            6..=20 => QueueStatus::Busy,
            _ => QueueStatus::Overloaded,
        }
    }
}

/// Decrements the pending count however the request ends.
struct PendingSlot<'a> {
    state: &'a Mutex<QueueState>,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending = state.pending.saturating_sub(1);
    }
}

/// Clears the processing flag when the gate holder finishes.
struct ProcessingFlag<'a> {
    state: &'a Mutex<QueueState>,
}

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing = false;
    }
}

impl RequestQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op` through the queue with retry. `op` is called once per
    /// upstream attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        {
            let mut state = self.lock();
            if state.pending >= self.settings.max_queue_size {
                tracing::warn!(pending = state.pending, "Request queue full");
                return Err(AppError::QueueFull(state.pending));
            }
            state.pending += 1;
        }
        let _slot = PendingSlot { state: &self.state };
        let deadline = Instant::now() + self.settings.max_wait;

        let _turn = tokio::time::timeout_at(deadline, self.gate.lock())
            .await
            .map_err(|_| self.timeout_error())?;
        self.lock().processing = true;
        let _flag = ProcessingFlag { state: &self.state };

        loop {
            let ready_at = {
                let state = self.lock();
                let spacing = state.last_request.map(|t| t + self.settings.min_interval);
                match (spacing, state.backoff_until) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                }
            };
            if let Some(ready_at) = ready_at {
                if ready_at > deadline {
                    return Err(self.timeout_error());
                }
                tokio::time::sleep_until(ready_at).await;
            }
            self.lock().last_request = Some(Instant::now());

            match with_retry(self.settings.retry, &mut op).await {
                Ok(value) => {
                    self.lock().consecutive_failures = 0;
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() => {
                    let mut state = self.lock();
                    state.consecutive_failures += 1;
                    let backoff = e.retry_after().unwrap_or_else(|| {
                        exponential_backoff(state.consecutive_failures, self.settings.max_backoff)
                    });
                    state.backoff_until = Some(Instant::now() + backoff);
                    tracing::warn!(
                        backoff_ms = backoff.as_millis() as u64,
                        consecutive_failures = state.consecutive_failures,
                        "Rate limited, backing off before retrying request"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn timeout_error(&self) -> AppError {
        AppError::QueueTimeout(self.settings.max_wait.as_secs())
    }

    pub fn info(&self) -> QueueInfo {
        let state = self.lock();
        let now = Instant::now();
        QueueInfo {
            queue_length: state.pending,
            is_processing: state.processing,
            consecutive_failures: state.consecutive_failures,
            backoff_remaining_ms: state
                .backoff_until
                .map(|t| t.saturating_duration_since(now).as_millis() as u64)
                .unwrap_or(0),
            estimated_wait_time: state.pending as u64 * self.settings.min_interval.as_millis() as u64,
        }
    }
}

/// `1s * 2^failures`, capped.
fn exponential_backoff(failures: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(failures.min(16));
    Duration::from_secs(1).saturating_mul(factor).min(cap)
}

/// Human-readable wait: `45s`, `3m`, `1h 5m`. Partial units round up.
pub fn format_wait_time(ms: u64) -> String {
    let seconds = ms.div_ceil(1000);
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds.div_ceil(60))
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600).div_ceil(60))
    }
}
