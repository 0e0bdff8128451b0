//! Foreground lock.
//!
//! Bringing a page to the front and clicking something that navigates must
//! not interleave with the same sequence on another page of the browser.
//! Waiting for the lock is bounded: a holder that never releases turns into
//! a `LockTimeout` for the next caller instead of a deadlock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Default bound on waiting for the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("foreground lock not acquired within {0:?}")]
pub struct LockTimeout(pub Duration);

/// Shared by every page of one browser.
#[derive(Debug, Clone)]
pub struct ForegroundLock {
    inner: Arc<Mutex<()>>,
    timeout: Duration,
}

impl Default for ForegroundLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl ForegroundLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the lock. The critical section lasts as long as the guard.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, ()>, LockTimeout> {
        tokio::time::timeout(self.timeout, self.inner.lock())
            .await
            .map_err(|_| {
                tracing::warn!("foreground lock wait exceeded {:?}", self.timeout);
                LockTimeout(self.timeout)
            })
    }

    /// Run `section` while holding the lock.
    pub async fn run<F, T>(&self, section: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let _guard = self.acquire().await?;
        section.await
    }
}
