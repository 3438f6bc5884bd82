//! etcd encryption of Shoot secrets
//!
//! Run [`EncryptionConfigManager::apply_encryption_configuration`] and then
//! [`SecretRewriteCoordinator::rewrite_if_changed`] on every reconciliation,
//! sharing one [`ChecksumStore`] between them.

pub mod checksums;
pub mod config;
pub mod manager;
pub mod rewrite;

pub use checksums::ChecksumStore;
pub use config::{EncryptionConfiguration, ENCRYPTION_CONFIGURATION_DATA_KEY};
pub use manager::EncryptionConfigManager;
pub use rewrite::{RewriteOutcome, SecretRewriteCoordinator};
