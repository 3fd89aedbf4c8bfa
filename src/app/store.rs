//! Credential store facade.
//!
//! Typed access to the `"meo"` namespace on top of a raw [`StoragePort`].
//! Strings are stored as UTF-8 blobs, small integers as little-endian
//! `i16`. Writing a string equal to the stored one is a no-op, so callers
//! may persist unconditionally without wearing flash.

use log::warn;

use crate::error::StorageError;

use super::ports::StoragePort;

/// Namespace holding every key below.
pub const NAMESPACE: &str = "meo";

pub const KEY_WIFI_SSID: &str = "wifi_ssid";
pub const KEY_WIFI_PASS: &str = "wifi_pass";
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_TX_KEY: &str = "tx_key";

/// Largest string value read back through [`CredentialStore::load_string`].
const MAX_STRING_LEN: usize = 256;

/// Owns the storage backend and exposes the typed operations.
pub struct CredentialStore<S: StoragePort> {
    backend: S,
}

impl<S: StoragePort> CredentialStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    // ── Strings ───────────────────────────────────────────────

    /// Persist `value` under `key`, skipping the write if it is unchanged.
    pub fn save_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.load_string(key).as_deref() == Some(value) {
            return Ok(());
        }
        self.backend.write(NAMESPACE, key, value.as_bytes())
    }

    /// Stored string, or `None` when missing or unreadable.
    pub fn load_string(&self, key: &str) -> Option<String> {
        let mut buf = [0u8; MAX_STRING_LEN];
        match self.backend.read(NAMESPACE, key, &mut buf) {
            Ok(len) => match core::str::from_utf8(&buf[..len]) {
                Ok(s) => Some(s.into()),
                Err(_) => {
                    warn!("Store: '{}' is not UTF-8", key);
                    None
                }
            },
            Err(StorageError::NotFound) => None,
            Err(e) => {
                warn!("Store: read '{}' failed: {}", key, e);
                None
            }
        }
    }

    /// Stored string, or `""` when missing.
    pub fn load_string_or_empty(&self, key: &str) -> String {
        self.load_string(key).unwrap_or_default()
    }

    // ── Blobs ─────────────────────────────────────────────────

    pub fn save_bytes(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.backend.write(NAMESPACE, key, data)
    }

    /// Read a blob into `buf`. Fails if the stored blob is larger than `buf`.
    pub fn load_bytes(&self, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.backend.read(NAMESPACE, key, buf)
    }

    // ── Small integers ────────────────────────────────────────

    pub fn save_i16(&mut self, key: &str, value: i16) -> Result<(), StorageError> {
        self.backend.write(NAMESPACE, key, &value.to_le_bytes())
    }

    pub fn load_i16(&self, key: &str) -> Result<i16, StorageError> {
        let mut buf = [0u8; 2];
        let len = self.backend.read(NAMESPACE, key, &mut buf)?;
        if len != 2 {
            return Err(StorageError::InvalidData);
        }
        Ok(i16::from_le_bytes(buf))
    }

    // ── Removal ───────────────────────────────────────────────

    pub fn clear_key(&mut self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(NAMESPACE, key)
    }

    /// Factory reset: drop credentials and identity.
    pub fn clear_all(&mut self) -> Result<(), StorageError> {
        self.backend.erase_namespace(NAMESPACE)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.backend.exists(NAMESPACE, key)
    }
}
