use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::json_file;

pub type Phonenumber = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub nr: String,
    pub city: String,
    pub postalcode: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub iban: String,
    pub bic: String,
    pub country: String,
}

/// The whole profile document, keyed by `username` in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub email: BTreeMap<String, String>,
    #[serde(default)]
    pub phone: BTreeMap<String, Phonenumber>,
    #[serde(default)]
    pub address: BTreeMap<String, Address>,
    #[serde(default)]
    pub bank: BTreeMap<String, BankAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default)]
    pub public_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new_id() -> String {
        format!("usr_{}", Uuid::new_v4().simple())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{message}")]
    Persistence { message: String },
    #[error("record store unavailable: {message}")]
    Unavailable { message: String },
}

/// Whole-record document store addressed by username.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Replaces the stored record for `record.username`.
    async fn save(&self, record: &UserRecord) -> Result<(), StoreError>;
}

/// In-memory record map, optionally mirrored to a JSON file after every save.
#[derive(Clone)]
pub struct FileRecordStore {
    state: Arc<RwLock<RecordStoreState>>,
    persist_lock: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct RecordStoreState {
    users: HashMap<String, UserRecord>,
}

impl FileRecordStore {
    pub fn from_config(config: &Config) -> Self {
        let path = config.record_store_path.clone();
        let state = json_file::load_or_default(path.as_deref(), "record_store");

        Self {
            state: Arc::new(RwLock::new(state)),
            persist_lock: Arc::new(Mutex::new(())),
            path,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(RecordStoreState::default())),
            persist_lock: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    async fn persist_state(&self, snapshot: &RecordStoreState) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        json_file::write_atomically(path, snapshot)
            .await
            .map_err(|message| StoreError::Persistence { message })
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.get(username).cloned())
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        // Serializes file writes so the file never regresses to an older snapshot.
        let _persist_guard = self.persist_lock.lock().await;

        let mut stored = record.clone();
        stored.updated_at = Some(Utc::now());

        let (previous, snapshot) = {
            let mut state = self.state.write().await;
            let previous = state.users.insert(stored.username.clone(), stored.clone());
            (previous, state.clone())
        };

        if let Err(error) = self.persist_state(&snapshot).await {
            let mut state = self.state.write().await;
            match previous {
                Some(previous) => {
                    state.users.insert(previous.username.clone(), previous);
                }
                None => {
                    state.users.remove(&stored.username);
                }
            }
            return Err(error);
        }

        Ok(())
    }
}
