//! Checksums of the committed encryption configurations
//!
//! Written by [`EncryptionConfigManager`](super::EncryptionConfigManager)
//! and read by [`SecretRewriteCoordinator`](super::SecretRewriteCoordinator).
//! The lock is only held for the map access itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared table of Shoot key to configuration checksum
#[derive(Clone, Debug, Default)]
pub struct ChecksumStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ChecksumStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the checksum committed for `shoot_key`
    pub fn record(&self, shoot_key: &str, checksum: String) {
        self.inner.write().insert(shoot_key.to_string(), checksum);
    }

    /// Last checksum committed for `shoot_key`
    pub fn get(&self, shoot_key: &str) -> Option<String> {
        self.inner.read().get(shoot_key).cloned()
    }
}
