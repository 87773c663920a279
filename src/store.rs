//! User -> linked account mapping, persisted as one JSON object file.
//!
//! Every operation takes the same mutex, so reads never observe a half
//! written file and concurrent upserts do not lose each other's fields.
//! The file is handled as raw JSON: upserts merge into the user's object and
//! leave keys and users this service does not know about alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::types::account::{BinanceCredentials, UserAccountRecord};

type Document = Map<String, Value>;

#[derive(Clone)]
pub struct AccountStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AccountStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the 3Commas account id for `user_id`. Blank inputs are ignored.
    pub async fn save_account_id(&self, user_id: &str, account_id: &str) -> Result<()> {
        if user_id.is_empty() || account_id.is_empty() {
            return Ok(());
        }
        self.upsert(user_id, |fields| {
            fields.insert("accountId".to_string(), Value::from(account_id));
        })
        .await
    }

    pub async fn account_id(&self, user_id: &str) -> Option<String> {
        self.record(user_id).await.and_then(|r| r.account_id)
    }

    /// Record the Binance key pair for `user_id`. Blank inputs are ignored.
    pub async fn set_binance_credentials(
        &self,
        user_id: &str,
        api_key: &str,
        api_secret: &str,
    ) -> Result<()> {
        if user_id.is_empty() || api_key.is_empty() || api_secret.is_empty() {
            return Ok(());
        }
        self.upsert(user_id, |fields| {
            fields.insert("binanceApiKey".to_string(), Value::from(api_key));
            fields.insert("binanceApiSecret".to_string(), Value::from(api_secret));
        })
        .await
    }

    pub async fn binance_credentials(&self, user_id: &str) -> Option<BinanceCredentials> {
        self.record(user_id)
            .await
            .and_then(|r| r.binance_credentials())
    }

    /// Every record that decodes. Entries that do not are skipped, not dropped
    /// from the file.
    pub async fn all_records(&self) -> BTreeMap<String, UserAccountRecord> {
        let _guard = self.lock.lock().await;
        self.read_all()
            .await
            .into_iter()
            .filter_map(|(user_id, value)| {
                let record = self.decode(&user_id, value)?;
                Some((user_id, record))
            })
            .collect()
    }

    async fn record(&self, user_id: &str) -> Option<UserAccountRecord> {
        if user_id.is_empty() {
            return None;
        }
        let _guard = self.lock.lock().await;
        let value = self.read_all().await.remove(user_id)?;
        self.decode(user_id, value)
    }

    fn decode(&self, user_id: &str, value: Value) -> Option<UserAccountRecord> {
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable account record for user {}: {}", user_id, e);
                None
            }
        }
    }

    async fn upsert<F>(&self, user_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;

        let entry = document
            .entry(user_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entry {
            update(fields);
        }

        self.write_all(&document).await?;
        debug!("Stored account mapping for user {}", user_id);
        Ok(())
    }

    async fn ensure_file(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        if fs::metadata(&self.path).await.is_err() {
            fs::write(&self.path, "{}").await?;
        }
        Ok(())
    }

    /// Strict read used before writing: anything but a JSON object is an error.
    async fn load(&self) -> Result<Document> {
        self.ensure_file().await?;
        let raw = fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(Document::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(AppError::Storage(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(AppError::Storage(format!(
                "{} is not valid JSON: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Lenient read: an unusable file reads as empty.
    async fn read_all(&self) -> Document {
        self.load().await.unwrap_or_else(|e| {
            warn!("Account store unreadable, treating as empty: {}", e);
            Document::new()
        })
    }

    async fn write_all(&self, document: &Document) -> Result<()> {
        let body = serde_json::to_string_pretty(document)?;
        // Write to a sibling temp file, then rename it into place.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, body).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
