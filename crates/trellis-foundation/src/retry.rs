//! 重试原语 / Retry, Backoff, and Circuit Breaker Primitives
//!
//! 提供指数退避重试和断路器能力，供执行引擎和独立调用方使用
//! Exponential-backoff retry and circuit-breaker protection, usable both by
//! the execution engine (per-node policies) and as standalone helpers.
//!
//! 重试循环从不抛出：它总是返回一个 [`RetryOutcome`] 记录，
//! 调用方据此决定成功或失败。
//! The retry loop never raises: it always resolves to a [`RetryOutcome`]
//! record describing what happened, and the caller decides what failure
//! means.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

// ────────────────────── Backoff ──────────────────────

/// 重试行为配置
/// Knobs for the retry loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// 总尝试次数（包含首次），最小为 1
    /// Total attempts including the first; clamped to at least 1.
    pub max_attempts: u32,
    /// 首次重试前的基础延迟
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// 延迟上限
    /// Ceiling applied before jitter.
    pub max_delay_ms: u64,
    /// 每次重试延迟的增长倍数
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// 抖动比例（0 = 无抖动）
    /// Jitter fraction of the computed delay (0 = deterministic).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// 计算第 `attempt` 次（从 1 开始）失败后的退避延迟
/// Delay after the 1-based `attempt` fails: `base * multiplier^(attempt-1)`,
/// capped at `max_delay_ms`, then jittered by a uniform fraction in
/// `±jitter`. Never negative.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let raw = config.base_delay_ms as f64 * config.multiplier.powi(exponent as i32);
    let capped = raw.min(config.max_delay_ms as f64);
    if config.jitter <= 0.0 || capped <= 0.0 {
        return capped.max(0.0) as u64;
    }
    let spread = capped * config.jitter;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (capped + offset).max(0.0) as u64
}

// ────────────────────── Retry loop ──────────────────────

/// 一次重试通知
/// What the `on_retry` hook sees before each sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// The 1-based attempt that just failed.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Delay before the next attempt, in milliseconds.
    pub delay_ms: u64,
    pub error: String,
}

/// Boxed async hook invoked before each retry sleep.
pub type RetryHook =
    Arc<dyn Fn(RetryAttempt) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Boxed async hook invoked before every attempt with its 1-based number.
pub type AttemptHook =
    Arc<dyn Fn(u32) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Predicate deciding whether an error message is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// 重试选项：配置 + 可选的谓词和钩子
/// Retry configuration plus the optional predicate and hooks.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub config: RetryConfig,
    /// When set, errors it rejects stop the loop immediately.
    pub retry_if: Option<RetryPredicate>,
    /// Fires before every attempt, including the first.
    pub on_attempt: Option<AttemptHook>,
    /// Observes each retry decision; the engine uses this to publish
    /// retry events.
    pub on_retry: Option<RetryHook>,
}

impl RetryOptions {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_if: None,
            on_attempt: None,
            on_retry: None,
        }
    }

    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn on_attempt<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_attempt = Some(Arc::new(move |attempt| Box::pin(hook(attempt))));
        self
    }

    pub fn on_retry<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RetryAttempt) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_retry = Some(Arc::new(move |attempt| Box::pin(hook(attempt))));
        self
    }
}

/// 重试结果记录
/// Terminal record of a retry loop. Exactly one of `result` and `error` is
/// populated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    /// Attempts actually made, 1-based.
    pub attempts: u32,
    pub total_time_ms: u64,
}

impl<T> RetryOutcome<T> {
    /// Collapse the record into a plain `Result`.
    pub fn into_result(self) -> Result<T, String> {
        match self.result {
            Some(value) => Ok(value),
            None => Err(self
                .error
                .unwrap_or_else(|| "operation failed without an error message".to_string())),
        }
    }
}

/// 以指数退避重试一个异步操作
/// Drive `operation` with exponential backoff.
///
/// 从不返回 Err：无论成败都得到一个 [`RetryOutcome`]。
/// Never fails as a function call; inspect the returned record. The
/// `on_retry` hook fires after each failed attempt that will be retried,
/// before the backoff sleep.
pub async fn with_retry<T, F, Fut>(operation: F, options: &RetryOptions) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let started = Instant::now();
    let max_attempts = options.config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if let Some(hook) = &options.on_attempt {
            hook(attempt).await;
        }
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    success: true,
                    result: Some(value),
                    error: None,
                    attempts: attempt,
                    total_time_ms: started.elapsed().as_millis() as u64,
                };
            }
            Err(error) => {
                let retryable = options
                    .retry_if
                    .as_ref()
                    .map_or(true, |predicate| predicate(&error));
                last_error = error;

                if !retryable {
                    debug!(
                        attempt,
                        error = %last_error,
                        "Error not retryable, stopping"
                    );
                    return RetryOutcome {
                        success: false,
                        result: None,
                        error: Some(last_error),
                        attempts: attempt,
                        total_time_ms: started.elapsed().as_millis() as u64,
                    };
                }

                if attempt < max_attempts {
                    let delay_ms = compute_delay(&options.config, attempt);
                    debug!(
                        attempt,
                        max_attempts, delay_ms,
                        error = %last_error,
                        "Retrying after failure"
                    );
                    if let Some(hook) = &options.on_retry {
                        hook(RetryAttempt {
                            attempt,
                            max_attempts,
                            delay_ms,
                            error: last_error.clone(),
                        })
                        .await;
                    }
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    warn!(
        max_attempts,
        error = %last_error,
        "All retry attempts exhausted"
    );
    RetryOutcome {
        success: false,
        result: None,
        error: Some(last_error),
        attempts: max_attempts,
        total_time_ms: started.elapsed().as_millis() as u64,
    }
}

// ────────────────────── RetryPolicy ──────────────────────

/// 可序列化的节点级重试策略
/// Declarative retry policy, attachable to a workflow node and loadable from
/// YAML/JSON definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    /// Substrings of retryable error messages. Empty means every error is
    /// retryable.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier,
            jitter: config.jitter,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// The numeric knobs as a [`RetryConfig`].
    pub fn config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }

    /// Adapt the substring list into executable [`RetryOptions`]. Matching
    /// is case-insensitive.
    pub fn to_options(&self) -> RetryOptions {
        let mut options = RetryOptions::new(self.config());
        if !self.retryable_errors.is_empty() {
            let patterns: Vec<String> = self
                .retryable_errors
                .iter()
                .map(|pattern| pattern.to_lowercase())
                .collect();
            options.retry_if = Some(Arc::new(move |error: &str| {
                let error = error.to_lowercase();
                patterns.iter().any(|pattern| error.contains(pattern.as_str()))
            }));
        }
        options
    }
}

/// [`with_retry`] driven by a declarative [`RetryPolicy`].
pub async fn with_retry_policy<T, F, Fut>(operation: F, policy: &RetryPolicy) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    with_retry(operation, &policy.to_options()).await
}

// ────────────────────── CircuitBreaker ──────────────────────

/// 断路器状态
/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// 健康状态，请求通过
    /// Healthy, calls pass through.
    Closed,
    /// 故障状态，请求被短路
    /// Failing, calls are short-circuited.
    Open,
    /// 测试恢复，允许一个探测请求
    /// Testing recovery, one probe call allowed.
    HalfOpen,
}

/// 断路器配置
/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a recovery probe.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

/// 断路器调用错误
/// Failure modes of a guarded call.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum CircuitError {
    /// 断路器打开，调用被短路
    /// The circuit is open; the call never ran.
    #[error("Circuit '{name}' is open; retry in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },

    /// 被保护的调用本身失败
    /// The guarded call ran and failed.
    #[error("{0}")]
    Call(String),
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// 断路器：连续失败达到阈值后短路调用
/// Short-circuits calls after a run of consecutive failures, then probes for
/// recovery once the reset timeout elapses.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// 通过断路器执行一次调用
    /// Run `operation` behind the breaker. Open circuits reject immediately
    /// with [`CircuitError::Open`]; a half-open probe that succeeds closes
    /// the circuit, one that fails re-opens it.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        if let Some(retry_in_ms) = self.check_gate() {
            return Err(CircuitError::Open {
                name: self.name.clone(),
                retry_in_ms,
            });
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(CircuitError::Call(error))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Force the circuit back to Closed, clearing the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// Whether a call would be allowed right now. Like [`execute`], an open
    /// circuit whose reset timeout has elapsed flips to HalfOpen here.
    ///
    /// [`execute`]: CircuitBreaker::execute
    pub fn is_allowed(&self) -> bool {
        self.check_gate().is_none()
    }

    /// Returns `None` when the call may proceed, or the remaining open time
    /// in milliseconds when it is short-circuited.
    fn check_gate(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let reset_after = Duration::from_millis(self.config.reset_timeout_ms);
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(reset_after);
                if elapsed >= reset_after {
                    debug!(
                        circuit = %self.name,
                        "Circuit transitioning to HalfOpen for a recovery probe"
                    );
                    inner.state = CircuitState::HalfOpen;
                    None
                } else {
                    Some((reset_after - elapsed).as_millis() as u64)
                }
            }
        }
    }

    /// Record a successful call, closing the circuit.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.state = CircuitState::Closed;
    }

    /// Record a failed call; may open the circuit.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            warn!(circuit = %self.name, "Recovery probe failed, re-opening circuit");
            inner.state = CircuitState::Open;
            return;
        }

        if inner.state != CircuitState::Open
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            warn!(
                circuit = %self.name,
                consecutive_failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit opening after consecutive failures"
            );
            inner.state = CircuitState::Open;
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .finish()
    }
}

// ────────────────────── Tests ──────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_compute_delay_grows_exponentially() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(compute_delay(&config, 1), 1000);
        assert_eq!(compute_delay(&config, 2), 2000);
        assert_eq!(compute_delay(&config, 3), 4000);
        assert_eq!(compute_delay(&config, 4), 8000);
    }

    #[test]
    fn test_compute_delay_caps_at_max() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        // 1000 * 2^9 = 512000, well past the 30s cap.
        assert_eq!(compute_delay(&config, 10), 30_000);
    }

    #[test]
    fn test_compute_delay_jitter_stays_in_band() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.5,
        };
        for _ in 0..200 {
            let delay = compute_delay(&config, 1);
            assert!((500..=1500).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_compute_delay_zero_base() {
        let config = RetryConfig {
            base_delay_ms: 0,
            jitter: 0.5,
            ..RetryConfig::default()
        };
        assert_eq!(compute_delay(&config, 1), 0);
    }

    #[tokio::test]
    async fn test_with_retry_first_attempt_success() {
        let options = RetryOptions::new(fast_config());
        let outcome = with_retry(|| async { Ok::<_, String>(7) }, &options).await;

        assert!(outcome.success);
        assert_eq!(outcome.result, Some(7));
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventually_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RetryOptions::new(fast_config());

        let outcome = {
            let calls = Arc::clone(&calls);
            with_retry(
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("transient".to_string())
                        } else {
                            Ok("done")
                        }
                    }
                },
                &options,
            )
            .await
        };

        assert!(outcome.success);
        assert_eq!(outcome.result, Some("done"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_into_record() {
        let options = RetryOptions::new(fast_config());
        let outcome: RetryOutcome<()> =
            with_retry(|| async { Err("always broken".to_string()) }, &options).await;

        assert!(!outcome.success);
        assert_eq!(outcome.result, None);
        assert_eq!(outcome.error, Some("always broken".to_string()));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_non_retryable() {
        let options =
            RetryOptions::new(fast_config()).retry_if(|error| error.contains("transient"));
        let calls = Arc::new(AtomicU32::new(0));

        let outcome: RetryOutcome<()> = {
            let calls = Arc::clone(&calls);
            with_retry(
                move || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err("fatal: schema mismatch".to_string())
                    }
                },
                &options,
            )
            .await
        };

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_hook_sees_each_attempt() {
        let seen: Arc<Mutex<Vec<RetryAttempt>>> = Arc::new(Mutex::new(Vec::new()));
        let options = {
            let seen = Arc::clone(&seen);
            RetryOptions::new(fast_config()).on_retry(move |attempt| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(attempt);
                }
            })
        };

        let _: RetryOutcome<()> =
            with_retry(|| async { Err("nope".to_string()) }, &options).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2); // two retries after three attempts
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[0].delay_ms, 10);
        assert_eq!(seen[1].attempt, 2);
        assert_eq!(seen[1].delay_ms, 20);
        assert_eq!(seen[1].error, "nope");
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_attempt_hook_fires_every_try() {
        let attempts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let options = {
            let attempts = Arc::clone(&attempts);
            RetryOptions::new(fast_config()).on_attempt(move |attempt| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.lock().push(attempt);
                }
            })
        };

        let _: RetryOutcome<()> =
            with_retry(|| async { Err("nope".to_string()) }, &options).await;

        assert_eq!(*attempts.lock(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_substring_matching_ignores_case() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter: 0.0,
            retryable_errors: vec!["timeout".to_string(), "unavailable".to_string()],
        };

        let outcome: RetryOutcome<()> = with_retry_policy(
            || async { Err("Connection TIMEOUT".to_string()) },
            &policy,
        )
        .await;
        assert_eq!(outcome.attempts, 3);

        let outcome: RetryOutcome<()> =
            with_retry_policy(|| async { Err("bad request".to_string()) }, &policy).await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_empty_list_retries_everything() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let outcome: RetryOutcome<()> =
            with_retry_policy(|| async { Err("anything".to_string()) }, &policy).await;
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_retry_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert!(policy.retryable_errors.is_empty());
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = RetryOutcome {
            success: true,
            result: Some(1),
            error: None,
            attempts: 1,
            total_time_ms: 0,
        };
        assert_eq!(ok.into_result(), Ok(1));

        let err: RetryOutcome<i32> = RetryOutcome {
            success: false,
            result: None,
            error: Some("boom".to_string()),
            attempts: 3,
            total_time_ms: 0,
        };
        assert_eq!(err.into_result(), Err("boom".to_string()));
    }

    fn probe_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 0, // immediate reset for testing
        }
    }

    #[tokio::test]
    async fn test_breaker_closed_passes_calls() {
        let breaker = CircuitBreaker::with_defaults("svc");
        let out = breaker.execute(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(out, Ok(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
            },
        );

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>("down".to_string()) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Short-circuited without running the closure.
        let ran = Arc::new(AtomicU32::new(0));
        let out = {
            let ran = Arc::clone(&ran);
            breaker
                .execute(move || {
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(1)
                    }
                })
                .await
        };
        assert!(matches!(out, Err(CircuitError::Open { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_breaker_failure_resets_on_success() {
        let breaker = CircuitBreaker::new("svc", probe_config());
        let _ = breaker
            .execute(|| async { Err::<(), _>("down".to_string()) })
            .await;
        assert_eq!(breaker.consecutive_failures(), 1);

        let _ = breaker.execute(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("svc", probe_config());
        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>("down".to_string()) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero reset timeout: the next call is the recovery probe.
        let out = breaker.execute(|| async { Ok::<_, String>(9) }).await;
        assert_eq!(out, Ok(9));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("svc", probe_config());
        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>("down".to_string()) })
                .await;
        }

        let out = breaker
            .execute(|| async { Err::<(), _>("still down".to_string()) })
            .await;
        assert!(matches!(out, Err(CircuitError::Call(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_breaker_direct_driving() {
        let breaker = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
            },
        );
        assert!(breaker.is_allowed());

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_allowed());

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_allowed());
    }

    #[tokio::test]
    async fn test_breaker_manual_reset() {
        let breaker = CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 60_000,
            },
        );
        let _ = breaker
            .execute(|| async { Err::<(), _>("down".to_string()) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let out = breaker.execute(|| async { Ok::<_, String>(1) }).await;
        assert_eq!(out, Ok(1));
    }
}
