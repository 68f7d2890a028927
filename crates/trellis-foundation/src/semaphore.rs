//! 计数信号量 / Counting Semaphore with FIFO Waiters
//!
//! 为执行引擎提供并发上限控制
//! Bounds how many units of work may run at once. The execution engine sizes
//! one of these per run from the workflow's `max_concurrency`.
//!
//! 与 tokio 自带的信号量不同，这里的等待者按 FIFO 顺序唤醒，
//! 并且 release 在有等待者时直接移交许可，而不是先归还再竞争。
//! Unlike the stock tokio semaphore, waiters here wake in strict FIFO order
//! and `release` hands the permit directly to the head waiter instead of
//! returning it to the pool for a free-for-all.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use dashmap::DashMap;

// ────────────────────── Errors ──────────────────────

/// 信号量操作错误
/// Errors surfaced by semaphore operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SemaphoreError {
    /// 许可数必须为正
    /// A semaphore needs at least one permit.
    #[error("Semaphore '{name}' requires at least one permit")]
    InvalidPermits { name: String },

    /// 在超时时间内未获取到许可
    /// No permit became available within the deadline.
    #[error("Timed out waiting for a '{name}' permit after {waited_ms}ms")]
    AcquireTimeout { name: String, waited_ms: u64 },

    /// 等待期间信号量被排空
    /// The semaphore was drained while this caller was queued.
    #[error("Semaphore '{name}' was drained while waiting for a permit")]
    Drained { name: String },

    /// release 次数超过了许可上限
    /// More releases than acquired permits.
    #[error("Semaphore '{name}' released above its limit of {max_permits} permits")]
    ReleaseOverflow { name: String, max_permits: usize },
}

// ────────────────────── Semaphore ──────────────────────

/// 唤醒原因，通过 oneshot 从 release/drain 传给等待者
/// Why a queued waiter was woken.
enum WakeReason {
    /// release 直接移交了一个许可
    /// A permit was handed off directly by `release`.
    Granted,
    /// drain 清空了等待队列
    /// `drain` flushed the wait queue.
    Drained,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<WakeReason>,
}

struct Inner {
    /// Permits currently available for the fast path.
    permits: usize,
    max_permits: usize,
    /// FIFO queue; `release` always serves the head first.
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
}

/// 计数信号量，可克隆句柄，克隆共享同一许可池
/// Counting semaphore. Cloning yields another handle to the same permit pool.
#[derive(Clone)]
pub struct Semaphore {
    shared: Arc<Shared>,
}

impl Semaphore {
    /// Create an anonymous semaphore with `permits` concurrent slots.
    /// `permits` must be at least 1.
    pub fn new(permits: usize) -> Result<Self, SemaphoreError> {
        Self::named("semaphore", permits)
    }

    /// Create a named semaphore. The name only appears in logs and errors.
    pub fn named(name: impl Into<String>, permits: usize) -> Result<Self, SemaphoreError> {
        let name = name.into();
        if permits == 0 {
            return Err(SemaphoreError::InvalidPermits { name });
        }
        Ok(Self {
            shared: Arc::new(Shared {
                name,
                inner: Mutex::new(Inner {
                    permits,
                    max_permits: permits,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                }),
            }),
        })
    }

    /// 获取一个许可，必要时排队等待
    /// Acquire a permit, queueing FIFO behind earlier callers when none are
    /// free.
    ///
    /// 取消安全：如果返回的 future 在等待途中被丢弃，它会把自己从队列里
    /// 移除；如果许可恰好已经移交给它，则转交给下一个等待者。
    /// Cancel safe: dropping the returned future removes this caller from the
    /// queue, and a permit that raced into its hands is passed straight on to
    /// the next waiter.
    pub async fn acquire(&self) -> Result<SemaphorePermit, SemaphoreError> {
        let mut handle = {
            let mut inner = self.shared.inner.lock();
            if inner.permits > 0 {
                inner.permits -= 1;
                return Ok(self.permit());
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push_back(Waiter { id, tx });
            WaitHandle {
                shared: Arc::clone(&self.shared),
                id,
                rx,
                done: false,
            }
        };

        debug!(
            semaphore = %self.shared.name,
            waiter_id = handle.id,
            "Waiting for a permit"
        );

        let reason = (&mut handle.rx).await;
        handle.done = true;

        match reason {
            Ok(WakeReason::Granted) => Ok(self.permit()),
            // A closed channel without a grant only happens on drain paths.
            Ok(WakeReason::Drained) | Err(_) => Err(SemaphoreError::Drained {
                name: self.shared.name.clone(),
            }),
        }
    }

    /// 带超时的获取
    /// Acquire with a deadline. On timeout the queue entry is removed exactly
    /// once; a grant that arrives in the same instant is honored rather than
    /// lost.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<SemaphorePermit, SemaphoreError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(SemaphoreError::AcquireTimeout {
                name: self.shared.name.clone(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// 非阻塞获取
    /// Take a permit immediately if one is free.
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        let mut inner = self.shared.inner.lock();
        if inner.permits > 0 {
            inner.permits -= 1;
            Some(self.permit())
        } else {
            None
        }
    }

    /// 归还一个许可
    /// Return a permit. If anyone is queued, the permit is handed directly to
    /// the head waiter; otherwise the available count grows. Releasing more
    /// permits than the semaphore owns is an error, not a silent widening.
    pub fn release(&self) -> Result<(), SemaphoreError> {
        Self::release_shared(&self.shared)
    }

    fn release_shared(shared: &Shared) -> Result<(), SemaphoreError> {
        loop {
            let waiter = {
                let mut inner = shared.inner.lock();
                match inner.waiters.pop_front() {
                    Some(w) => w,
                    None => {
                        if inner.permits >= inner.max_permits {
                            return Err(SemaphoreError::ReleaseOverflow {
                                name: shared.name.clone(),
                                max_permits: inner.max_permits,
                            });
                        }
                        inner.permits += 1;
                        return Ok(());
                    }
                }
            };
            // Send outside the lock; waking a task under the lock invites
            // re-entrancy trouble.
            if waiter.tx.send(WakeReason::Granted).is_ok() {
                return Ok(());
            }
            // Waiter cancelled before the grant arrived, serve the next one.
        }
    }

    /// 在持有许可的情况下运行闭包
    /// Run `f` while holding a permit. The permit is returned when the future
    /// completes, whatever it resolves to.
    pub async fn with_permit<T, F, Fut>(&self, f: F) -> Result<T, SemaphoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        let out = f().await;
        drop(permit);
        Ok(out)
    }

    /// `with_permit`, but give up if no permit arrives within `timeout`.
    pub async fn with_permit_timeout<T, F, Fut>(
        &self,
        timeout: Duration,
        f: F,
    ) -> Result<T, SemaphoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire_timeout(timeout).await?;
        let out = f().await;
        drop(permit);
        Ok(out)
    }

    /// 排空等待队列
    /// Flush the wait queue. Every queued caller fails with
    /// [`SemaphoreError::Drained`]; permits already held stay held and the
    /// semaphore remains usable. Returns how many waiters were woken.
    pub fn drain(&self) -> usize {
        let waiters: Vec<Waiter> = {
            let mut inner = self.shared.inner.lock();
            inner.waiters.drain(..).collect()
        };
        let mut woken = 0;
        for waiter in waiters {
            if waiter.tx.send(WakeReason::Drained).is_ok() {
                woken += 1;
            }
        }
        if woken > 0 {
            warn!(
                semaphore = %self.shared.name,
                woken, "Drained semaphore wait queue"
            );
        }
        woken
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Permits currently free for immediate acquisition.
    pub fn available_permits(&self) -> usize {
        self.shared.inner.lock().permits
    }

    pub fn max_permits(&self) -> usize {
        self.shared.inner.lock().max_permits
    }

    /// Callers currently queued.
    pub fn waiting_count(&self) -> usize {
        self.shared.inner.lock().waiters.len()
    }

    /// Permits held or committed to a woken waiter.
    pub fn in_use(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.max_permits - inner.permits
    }

    /// Point-in-time counters for monitoring.
    pub fn stats(&self) -> SemaphoreStats {
        let inner = self.shared.inner.lock();
        SemaphoreStats {
            name: self.shared.name.clone(),
            max_permits: inner.max_permits,
            available: inner.permits,
            in_use: inner.max_permits - inner.permits,
            waiting: inner.waiters.len(),
        }
    }

    fn permit(&self) -> SemaphorePermit {
        SemaphorePermit {
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Semaphore")
            .field("name", &self.shared.name)
            .field("permits", &inner.permits)
            .field("max_permits", &inner.max_permits)
            .field("waiting", &inner.waiters.len())
            .finish()
    }
}

// ────────────────────── WaitHandle ──────────────────────

/// 队列中等待者的看门结构
/// Guard for a queued waiter. Dropping it mid-wait removes the queue entry;
/// if a grant already raced in, the permit is forwarded to the next waiter
/// instead of leaking.
struct WaitHandle {
    shared: Arc<Shared>,
    id: u64,
    rx: oneshot::Receiver<WakeReason>,
    done: bool,
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            if let Some(pos) = inner.waiters.iter().position(|w| w.id == self.id) {
                // Still queued: no grant can have been sent, removal is the
                // whole cleanup.
                inner.waiters.remove(pos);
                return;
            }
        }
        // Already popped by release(). Closing first makes the check atomic:
        // either the grant landed before the close and try_recv yields it, or
        // the send fails and release() moves to the next waiter.
        self.rx.close();
        if let Ok(WakeReason::Granted) = self.rx.try_recv() {
            if let Err(e) = Semaphore::release_shared(&self.shared) {
                error!(
                    semaphore = %self.shared.name,
                    error = %e,
                    "Failed to forward a permit from a cancelled waiter"
                );
            }
        }
    }
}

// ────────────────────── SemaphorePermit ──────────────────────

/// RAII 许可，丢弃时自动归还
/// A held permit. Dropping it releases the slot back to the semaphore.
#[must_use = "permits release on drop; dropping immediately frees the slot"]
pub struct SemaphorePermit {
    shared: Arc<Shared>,
    released: bool,
}

impl SemaphorePermit {
    /// 消耗许可但不归还名额
    /// Consume the permit without returning its slot. A later explicit
    /// [`Semaphore::release`] restores it.
    pub fn forget(mut self) {
        self.released = true;
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = Semaphore::release_shared(&self.shared) {
            // Only reachable when a manual release() already returned the
            // slot this permit was holding.
            error!(
                semaphore = %self.shared.name,
                error = %e,
                "Permit drop failed to release"
            );
        }
    }
}

impl std::fmt::Debug for SemaphorePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphorePermit")
            .field("semaphore", &self.shared.name)
            .finish()
    }
}

// ────────────────────── SemaphoreStats ──────────────────────

/// 信号量状态快照
/// Point-in-time view of one semaphore's counters.
#[derive(Debug, Clone, Serialize)]
pub struct SemaphoreStats {
    pub name: String,
    pub max_permits: usize,
    pub available: usize,
    pub in_use: usize,
    pub waiting: usize,
}

// ────────────────────── SemaphoreRegistry ──────────────────────

/// 命名信号量注册表
/// Named semaphores shared across callers. Handy when several runs should
/// compete for one pool, e.g. a shared downstream rate limit.
#[derive(Default)]
pub struct SemaphoreRegistry {
    semaphores: DashMap<String, Semaphore>,
}

impl SemaphoreRegistry {
    pub fn new() -> Self {
        Self {
            semaphores: DashMap::new(),
        }
    }

    /// Fetch the semaphore registered under `name`, creating it with
    /// `permits` slots on first use. An existing semaphore keeps its original
    /// size; a mismatch is logged, not an error.
    pub fn get_or_create(&self, name: &str, permits: usize) -> Result<Semaphore, SemaphoreError> {
        let entry = self
            .semaphores
            .entry(name.to_string())
            .or_try_insert_with(|| Semaphore::named(name, permits))?;
        let semaphore = entry.clone();
        drop(entry);
        if semaphore.max_permits() != permits {
            warn!(
                semaphore = name,
                requested = permits,
                actual = semaphore.max_permits(),
                "Named semaphore already exists with a different permit count"
            );
        }
        Ok(semaphore)
    }

    pub fn get(&self, name: &str) -> Option<Semaphore> {
        self.semaphores.get(name).map(|entry| entry.clone())
    }

    /// Drop a named semaphore. Held permits stay valid; queued waiters are
    /// drained first so nobody waits on an unreachable pool.
    pub fn remove(&self, name: &str) -> Option<Semaphore> {
        self.semaphores.remove(name).map(|(_, semaphore)| {
            semaphore.drain();
            semaphore
        })
    }

    /// Drain every registered semaphore's wait queue. Returns the total
    /// number of waiters woken.
    pub fn drain_all(&self) -> usize {
        self.semaphores
            .iter()
            .map(|entry| entry.value().drain())
            .sum()
    }

    pub fn names(&self) -> Vec<String> {
        self.semaphores
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stats for every registered semaphore.
    pub fn stats(&self) -> Vec<SemaphoreStats> {
        self.semaphores
            .iter()
            .map(|entry| entry.value().stats())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }
}

// ────────────────────── Tests ──────────────────────
