use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::record_store::{RecordStore, StoreError, UserRecord};
use crate::user_locks::{UserLockGuard, UserLocks};

/// Outcome taxonomy shared by every profile operation.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{operation} did not complete within {budget_ms}ms")]
    DeadlineExceeded {
        operation: &'static str,
        budget_ms: u64,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProfileError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Deadline and availability failures can be retried with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded { .. } | Self::Store(StoreError::Unavailable { .. })
        )
    }
}

/// Record store access with per-username locking and a deadline on every call.
#[derive(Clone)]
pub struct RecordAccess {
    store: Arc<dyn RecordStore>,
    locks: UserLocks,
    store_timeout: Duration,
}

impl RecordAccess {
    pub fn new(store: Arc<dyn RecordStore>, locks: UserLocks, store_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            store_timeout,
        }
    }

    pub async fn lock(&self, username: &str) -> UserLockGuard {
        self.locks.acquire(username).await
    }

    pub async fn find(&self, username: &str) -> Result<Option<UserRecord>, ProfileError> {
        with_deadline("record_store.get", self.store_timeout, self.store.get(username)).await
    }

    pub async fn load(&self, username: &str) -> Result<UserRecord, ProfileError> {
        self.find(username)
            .await?
            .ok_or_else(|| ProfileError::not_found(format!("user '{username}' not found")))
    }

    pub async fn save(&self, record: &UserRecord) -> Result<(), ProfileError> {
        with_deadline("record_store.save", self.store_timeout, self.store.save(record)).await
    }

    /// Runs a get-mutate-save sequence under the username lock.
    ///
    /// `operation` returns its result and whether the record changed; an
    /// unchanged record is not written back.
    pub async fn mutate<T, F>(&self, username: &str, operation: F) -> Result<T, ProfileError>
    where
        F: FnOnce(&mut UserRecord) -> Result<(T, bool), ProfileError>,
    {
        let _guard = self.lock(username).await;
        let mut record = self.load(username).await?;
        let (result, changed) = operation(&mut record)?;
        if changed {
            self.save(&record).await?;
        }
        Ok(result)
    }
}

pub async fn with_deadline<T, F>(
    operation: &'static str,
    budget: Duration,
    future: F,
) -> Result<T, ProfileError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result.map_err(ProfileError::from),
        Err(_) => Err(ProfileError::DeadlineExceeded {
            operation,
            budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
