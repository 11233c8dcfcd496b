use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

const CLEANUP_INTERVAL: usize = 64;
const CLEANUP_THRESHOLD: usize = 256;

/// Per-username mutual exclusion for read-modify-write sequences on a record.
///
/// Different usernames proceed in parallel. Entries are held weakly and
/// purged once no guard for them is alive.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<UserLocksInner>,
}

#[derive(Default)]
struct UserLocksInner {
    locks: std::sync::Mutex<HashMap<String, Weak<Mutex<()>>>>,
    acquisitions: AtomicUsize,
}

pub struct UserLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl UserLocks {
    pub async fn acquire(&self, username: &str) -> UserLockGuard {
        let mutex = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            let mutex = locks
                .get(username)
                .and_then(Weak::upgrade)
                .unwrap_or_else(|| {
                    let created = Arc::new(Mutex::new(()));
                    locks.insert(username.to_string(), Arc::downgrade(&created));
                    created
                });

            let tick = self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
            if locks.len() > CLEANUP_THRESHOLD && tick % CLEANUP_INTERVAL == 0 {
                locks.retain(|_, weak| weak.strong_count() > 0);
            }

            mutex
        };

        UserLockGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_username_is_serialized() {
        let locks = UserLocks::default();
        let guard = locks.acquire("alice").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire("alice").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("second acquire completes")
            .expect("task joins");
    }

    #[tokio::test]
    async fn different_usernames_do_not_contend() {
        let locks = UserLocks::default();
        let _alice = locks.acquire("alice").await;
        tokio::time::timeout(Duration::from_secs(1), locks.acquire("bob"))
            .await
            .expect("bob is not blocked by alice");
    }

    #[tokio::test]
    async fn released_entries_are_reused_not_accumulated() {
        let locks = UserLocks::default();
        for _ in 0..10 {
            let _guard = locks.acquire("alice").await;
        }
        assert_eq!(locks.entry_count(), 1);
    }
}
