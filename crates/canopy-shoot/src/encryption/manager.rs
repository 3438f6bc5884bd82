//! Encryption configuration lifecycle
//!
//! The configuration lives in Secret `etcd-encryption-secret` of the
//! Shoot's seed namespace; a copy is kept in the garden for disaster
//! recovery and is never read back.
//!
//! A configuration is created passive (identity first) and becomes active on
//! the next pass, once the checksum annotation shows that a rewrite pass has
//! completed. The force-plaintext annotation keeps it passive.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use canopy_common::crd::Shoot;
use canopy_common::retry::RetryConfig;
use canopy_common::{
    garden_etcd_encryption_secret_key, Error, Result, ETCD_ENCRYPTION_CHECKSUM_ANNOTATION,
    ETCD_ENCRYPTION_FORCE_PLAINTEXT_ANNOTATION, ETCD_ENCRYPTION_RESOURCE_SECRETS,
    ETCD_ENCRYPTION_SECRET_NAME,
};

use super::checksums::ChecksumStore;
use super::config::{read_secret, update_secret, EncryptionConfiguration};
use crate::client::{create_or_update_secret, SecretClient};

/// Owns the encryption configuration of Shoots
pub struct EncryptionConfigManager {
    seed: Arc<dyn SecretClient>,
    garden: Arc<dyn SecretClient>,
    checksums: ChecksumStore,
    retry: RetryConfig,
    now: fn() -> DateTime<Utc>,
}

impl EncryptionConfigManager {
    /// Create a manager writing to `seed` and backing up to `garden`
    pub fn new(
        seed: Arc<dyn SecretClient>,
        garden: Arc<dyn SecretClient>,
        checksums: ChecksumStore,
    ) -> Self {
        Self {
            seed,
            garden,
            checksums,
            retry: RetryConfig::conflicts(),
            now: Utc::now,
        }
    }

    /// Override the retry policy for conflicting writes
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the clock used to name new keys
    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Create or update the configuration of `shoot` and back it up.
    ///
    /// The checksum is recorded before the seed Secret is written, and the
    /// garden copy is only attempted once that write committed. A failed
    /// backup is returned as an error; the seed state stays committed.
    #[instrument(skip(self, shoot), fields(shoot = %shoot.key()))]
    pub async fn apply_encryption_configuration(
        &self,
        shoot: &Shoot,
    ) -> Result<EncryptionConfiguration> {
        let conf = self.create_or_update(shoot).await?;
        self.sync_to_garden(shoot, &conf).await?;
        Ok(conf)
    }

    async fn create_or_update(&self, shoot: &Shoot) -> Result<EncryptionConfiguration> {
        let key = shoot.key();
        let namespace = shoot.seed_namespace();

        let written = create_or_update_secret(
            self.seed.as_ref(),
            &self.retry,
            &namespace,
            ETCD_ENCRYPTION_SECRET_NAME,
            |secret, _existed| {
                let mut conf = match read_secret(secret) {
                    Ok(Some(conf)) => conf,
                    Ok(None) => {
                        info!("Creating new etcd encryption configuration for Shoot");
                        EncryptionConfiguration::new_passive((self.now)())?
                    }
                    Err(e) => {
                        return Err(Error::invariant(
                            &key,
                            format!("existing encryption configuration is malformed: {}", e),
                        ))
                    }
                };

                let encrypt = should_encrypt(secret);
                info!(
                    resource = ETCD_ENCRYPTION_RESOURCE_SECRETS,
                    encrypt, "Setting etcd encryption"
                );
                conf.set_resource_encryption(ETCD_ENCRYPTION_RESOURCE_SECRETS, encrypt)
                    .map_err(|e| Error::invariant(&key, e.to_string()))?;

                self.checksums.record(&key, conf.checksum()?);
                update_secret(secret, &conf)
            },
        )
        .await?;

        read_secret(&written)?.ok_or_else(|| {
            Error::internal_with_context(
                "encryption",
                format!("{}/{} was written without configuration", namespace, ETCD_ENCRYPTION_SECRET_NAME),
            )
        })
    }

    async fn sync_to_garden(&self, shoot: &Shoot, conf: &EncryptionConfiguration) -> Result<()> {
        let (namespace, name) =
            garden_etcd_encryption_secret_key(&shoot.namespace().unwrap_or_default(), &shoot.name_any());
        create_or_update_secret(
            self.garden.as_ref(),
            &self.retry,
            &namespace,
            &name,
            |secret, _existed| update_secret(secret, conf),
        )
        .await?;
        debug!(%namespace, %name, "Synced etcd encryption configuration to garden");
        Ok(())
    }
}

/// Whether new secret writes should be encrypted, judged by the seed Secret.
///
/// Never on first creation (no checksum annotation yet), never while the
/// force-plaintext annotation is `true`.
fn should_encrypt(secret: &Secret) -> bool {
    let annotations = secret.annotations();
    let first_creation = !annotations.contains_key(ETCD_ENCRYPTION_CHECKSUM_ANNOTATION);
    let force_plaintext = annotations
        .get(ETCD_ENCRYPTION_FORCE_PLAINTEXT_ANNOTATION)
        .map(String::as_str)
        == Some("true");
    !first_creation && !force_plaintext
}
