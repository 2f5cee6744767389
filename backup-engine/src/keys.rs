//! Per-identity encryption keys.
//!
//! One 256-bit key per owner, generated on first use and persisted hex-encoded
//! through the store's settings. Losing the stored key makes every backup
//! sealed under it unrecoverable.

use crate::store::{BackupStore, Identity};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Setting name the key is stored under
pub const KEY_SETTING: &str = "backup_encryption_key";

pub const KEY_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(encoded.trim(), &mut bytes)
            .map_err(|e| EngineError::Config(format!("stored encryption key is malformed: {}", e)))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Lazily populated key cache shared by all operations.
pub struct KeyCache {
    store: Arc<dyn BackupStore>,
    keys: DashMap<Identity, Arc<EncryptionKey>>,
    fill: Mutex<()>,
}

impl KeyCache {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self {
            store,
            keys: DashMap::new(),
            fill: Mutex::new(()),
        }
    }

    fn cached(&self, identity: &Identity) -> Option<Arc<EncryptionKey>> {
        self.keys.get(identity).map(|k| Arc::clone(k.value()))
    }

    /// Return the identity's stored key without ever creating one.
    pub async fn get_existing(&self, identity: &Identity) -> Result<Arc<EncryptionKey>> {
        if let Some(key) = self.cached(identity) {
            return Ok(key);
        }
        let encoded = self
            .store
            .get_setting(KEY_SETTING, identity)
            .await?
            .ok_or_else(|| EngineError::MissingKey(identity.to_string()))?;
        Ok(self.remember(identity, EncryptionKey::from_hex(&encoded)?))
    }

    /// Return the identity's key, loading or generating and storing it once.
    ///
    /// The lookup-generate-store sequence runs under a single lock so two
    /// callers never persist different keys for the same identity.
    pub async fn get_or_create(&self, identity: &Identity) -> Result<Arc<EncryptionKey>> {
        if let Some(key) = self.cached(identity) {
            return Ok(key);
        }

        let _guard = self.fill.lock().await;
        if let Some(key) = self.cached(identity) {
            return Ok(key);
        }

        let key = match self.store.get_setting(KEY_SETTING, identity).await? {
            Some(encoded) => EncryptionKey::from_hex(&encoded)?,
            None => {
                let key = EncryptionKey::generate();
                self.store
                    .set_setting(KEY_SETTING, &key.to_hex(), identity)
                    .await?;
                info!("Generated encryption key for identity {}", identity);
                key
            }
        };
        Ok(self.remember(identity, key))
    }

    fn remember(&self, identity: &Identity, key: EncryptionKey) -> Arc<EncryptionKey> {
        let key = Arc::new(key);
        self.keys.insert(identity.clone(), Arc::clone(&key));
        key
    }
}
