//! Per-run reconciliation session.
//!
//! A session owns the state shared by every reconciliation of one deployment
//! run: the cancellation token, and one async lock per shared sub-resource
//! whose guarded flag doubles as the patch ledger entry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use govsync_core::PolicyPatchReport;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::backoff::sleep_or_cancel;
use crate::error::ReconcileError;

/// Result of [`ReconciliationSession::with_exclusive_access`].
#[derive(Debug, Clone, PartialEq)]
pub enum Access<T> {
    /// The action ran in this call.
    Applied(T),
    /// An earlier call in this session already applied it; the action was skipped.
    AlreadyApplied,
}

impl<T> Access<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::AlreadyApplied => None,
        }
    }
}

/// Output of an exclusive action.
pub trait Mutation {
    /// Whether the action wrote to the backend. Only writes are followed by
    /// the settle delay.
    fn wrote(&self) -> bool;
}

impl Mutation for bool {
    fn wrote(&self) -> bool {
        *self
    }
}

impl Mutation for PolicyPatchReport {
    fn wrote(&self) -> bool {
        !self.patched.is_empty()
    }
}

#[derive(Debug)]
pub struct ReconciliationSession {
    id: Uuid,
    cancel: CancellationToken,
    settle_delay: Duration,
    locks: DashMap<String, Arc<Mutex<bool>>>,
}

impl ReconciliationSession {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            settle_delay,
            locks: DashMap::new(),
        }
    }

    /// Uses `token` instead of a fresh one, e.g. a child of a shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Whether `key` has been applied in this session.
    pub async fn is_applied(&self, key: &str) -> bool {
        match self.locks.get(key).map(|lock| lock.value().clone()) {
            Some(lock) => *lock.lock().await,
            None => false,
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<bool>> {
        self.locks.entry(key.to_string()).or_default().value().clone()
    }

    /// Runs `action` at most once per `key` per session.
    ///
    /// Calls for the same key are serialized; different keys run concurrently.
    /// On success the key is recorded and, if the action wrote, the settle
    /// delay is waited before the lock is released. A failed action records
    /// nothing, so a later call retries it. A call that finds the key recorded
    /// skips the action, waits the settle delay and returns
    /// [`Access::AlreadyApplied`].
    pub async fn with_exclusive_access<T, F, Fut>(
        &self,
        key: &str,
        action: F,
    ) -> Result<Access<T>, ReconcileError>
    where
        T: Mutation,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ReconcileError>>,
    {
        let lock = self.lock_for(key);
        let mut applied = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ReconcileError::cancelled("lock", key));
            }
            guard = lock.lock() => guard,
        };

        if *applied {
            drop(applied);
            debug!(key, session = %self.id, "already applied in this session");
            if !sleep_or_cancel(self.settle_delay, &self.cancel).await {
                return Err(ReconcileError::cancelled("settle", key));
            }
            return Ok(Access::AlreadyApplied);
        }

        let value = action().await?;
        *applied = true;
        if value.wrote() && !sleep_or_cancel(self.settle_delay, &self.cancel).await {
            return Err(ReconcileError::cancelled("settle", key));
        }
        Ok(Access::Applied(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn test_second_call_hits_the_ledger() {
        let session = ReconciliationSession::new(Duration::from_millis(10));
        let runs = AtomicU32::new(0);

        let first = session
            .with_exclusive_access("policy-1", || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();
        let started = Instant::now();
        let second = session
            .with_exclusive_access("policy-1", || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();

        assert_eq!(first, Access::Applied(true));
        assert_eq!(second, Access::AlreadyApplied);
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(session.is_applied("policy-1").await);
    }

    #[tokio::test]
    async fn test_failed_action_is_not_recorded() {
        let session = ReconciliationSession::new(Duration::ZERO);
        let failed: Result<Access<bool>, _> = session
            .with_exclusive_access("policy-1", || async {
                Err(ReconcileError::invalid("policy-1", "boom"))
            })
            .await;
        assert!(failed.is_err());
        assert!(!session.is_applied("policy-1").await);

        let retried = session
            .with_exclusive_access("policy-1", || async { Ok(true) })
            .await
            .unwrap();
        assert_eq!(retried, Access::Applied(true));
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let session = Arc::new(ReconciliationSession::new(Duration::from_millis(20)));
        let runs = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    session
                        .with_exclusive_access("shared", || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(true)
                        })
                        .await
                })
            })
            .collect();

        let mut applied = 0;
        for task in tasks {
            if let Access::Applied(_) = task.await.unwrap().unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting_for_the_lock() {
        let session = Arc::new(ReconciliationSession::new(Duration::from_secs(30)));
        let holder = session.clone();
        let held = tokio::spawn(async move {
            holder
                .with_exclusive_access("shared", || async { Ok(true) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = session.clone();
        let waiting = tokio::spawn(async move {
            waiter
                .with_exclusive_access("shared", || async { Ok(true) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.cancel();

        assert!(held.await.unwrap().unwrap_err().is_cancelled());
        assert!(waiting.await.unwrap().unwrap_err().is_cancelled());
    }
}
