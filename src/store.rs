//! JSON file store for balances and watch session records.
//!
//! The whole document lives in memory behind one [`RwLock`] and is
//! rewritten in full on [`Store::flush`]. The data lock covers only the
//! in-memory copy; a separate flush lock serializes writers of the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::models::{Balance, SessionRecord};
use crate::{Result, TradeBotError};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoreData {
    #[serde(default)]
    balances: Vec<Balance>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    data: RwLock<StoreData>,
    flush_lock: Mutex<()>,
}

impl Store {
    /// Opens the store at `path`, creating an empty one if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TradeBotError::Store`] if an existing file is not a valid
    /// store document, or an I/O error if the file cannot be read or
    /// created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            data: RwLock::new(StoreData::default()),
            flush_lock: Mutex::new(()),
        };

        if tokio::fs::try_exists(&store.path).await? {
            store.load().await?;
            info!(path = %store.path.display(), "Opened store");
        } else {
            store.flush().await?;
            info!(path = %store.path.display(), "Created empty store");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory state with the file contents.
    pub async fn load(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path).await?;
        // A zero-length file is what `touch` leaves behind; read it as empty.
        let data = if bytes.iter().all(u8::is_ascii_whitespace) {
            StoreData::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                TradeBotError::Store(format!("malformed store {}: {e}", self.path.display()))
            })?
        };

        *self.data.write().await = data;
        Ok(())
    }

    /// Writes the in-memory state to disk.
    ///
    /// The document goes to a sibling temporary file first and is renamed
    /// over the store, so readers never see a partial write. Concurrent
    /// flushes share the temporary file and run one at a time; the last
    /// one to take the flush lock writes the newest state.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        let bytes = {
            let data = self.data.read().await;
            serde_json::to_vec_pretty(&*data)?
        };

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Flushed store");
        Ok(())
    }

    pub async fn balances(&self) -> Vec<Balance> {
        self.data.read().await.balances.clone()
    }

    pub async fn update_balances(&self, balances: Vec<Balance>) {
        self.data.write().await.balances = balances;
    }

    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.data.read().await.sessions.clone()
    }

    /// Inserts `record`, replacing any stored record with the same id.
    pub async fn upsert_session(&self, record: SessionRecord) {
        let mut data = self.data.write().await;
        match data.sessions.iter_mut().find(|s| s.id == record.id) {
            Some(existing) => *existing = record,
            None => data.sessions.push(record),
        }
    }

    /// One past the highest session id on record.
    pub async fn next_session_id(&self) -> u64 {
        self.data
            .read()
            .await
            .sessions
            .iter()
            .map(|s| s.id)
            .max()
            .map_or(1, |id| id + 1)
    }
}
