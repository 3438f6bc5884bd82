//! Rewrite shoot Secrets under the current encryption configuration
//!
//! Patching a label onto a Secret makes the API server store it again
//! through the active provider. Secrets stamped with the current checksum
//! label are done; the seed Secret's checksum annotation records that a
//! whole pass finished and is written last, so an interrupted pass is simply
//! picked up again by the next one.

use std::sync::Arc;

use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use canopy_common::crd::Shoot;
use canopy_common::kube_utils::truncate_label_value;
use canopy_common::{
    ignore_not_found, Error, Result, ETCD_ENCRYPTION_CHECKSUM_ANNOTATION,
    ETCD_ENCRYPTION_CHECKSUM_LABEL, ETCD_ENCRYPTION_SECRET_NAME,
};

use super::checksums::ChecksumStore;
use crate::client::SecretClient;

/// What a rewrite pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The configuration was already fully rolled out
    UpToDate,
    /// Secrets were rewritten and the pass recorded
    Rewritten {
        /// Secrets patched (including ones that vanished meanwhile)
        secrets: usize,
    },
}

/// Finishes encryption rollouts by rewriting stale Secrets
pub struct SecretRewriteCoordinator {
    seed: Arc<dyn SecretClient>,
    shoot: Arc<dyn SecretClient>,
    checksums: ChecksumStore,
}

impl SecretRewriteCoordinator {
    /// Create a coordinator for one Shoot's `seed` and `shoot` clusters
    pub fn new(
        seed: Arc<dyn SecretClient>,
        shoot: Arc<dyn SecretClient>,
        checksums: ChecksumStore,
    ) -> Self {
        Self {
            seed,
            shoot,
            checksums,
        }
    }

    /// Rewrite every shoot Secret not yet stamped with the current checksum.
    ///
    /// Requires a checksum committed by
    /// [`apply_encryption_configuration`](super::EncryptionConfigManager::apply_encryption_configuration).
    /// Per-secret failures are collected; if any occur, the pass is not
    /// recorded and an aggregate error is returned.
    #[instrument(skip(self, shoot), fields(shoot = %shoot.key()))]
    pub async fn rewrite_if_changed(&self, shoot: &Shoot) -> Result<RewriteOutcome> {
        let key = shoot.key();
        let checksum = self.checksums.get(&key).ok_or_else(|| {
            Error::invariant(&key, "no encryption configuration checksum has been committed")
        })?;

        let namespace = shoot.seed_namespace();
        let config_secret = self
            .seed
            .get_secret(&namespace, ETCD_ENCRYPTION_SECRET_NAME)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("secret {}/{}", namespace, ETCD_ENCRYPTION_SECRET_NAME))
            })?;

        if config_secret
            .annotations()
            .get(ETCD_ENCRYPTION_CHECKSUM_ANNOTATION)
            == Some(&checksum)
        {
            info!(%checksum, "etcd encryption is up to date, no need to rewrite secrets");
            return Ok(RewriteOutcome::UpToDate);
        }

        let short = truncate_label_value(&checksum);
        let selector = format!("{}!={}", ETCD_ENCRYPTION_CHECKSUM_LABEL, short);
        let stale = self.shoot.list_secrets(None, &selector).await?;
        let label_patch = json!({ "metadata": { "labels": { ETCD_ENCRYPTION_CHECKSUM_LABEL: short } } });

        let mut errors = Vec::new();
        for secret in &stale {
            let ns = secret.namespace().unwrap_or_default();
            let name = secret.name_any();
            match ignore_not_found(self.shoot.merge_patch_secret(&ns, &name, &label_patch).await) {
                Ok(Some(())) => debug!(secret = %format!("{}/{}", ns, name), "Rewrote secret"),
                Ok(None) => debug!(secret = %format!("{}/{}", ns, name), "Secret vanished before rewrite"),
                Err(e) => {
                    warn!(secret = %format!("{}/{}", ns, name), error = %e, "Failed to rewrite secret");
                    errors.push(e);
                }
            }
        }
        if !errors.is_empty() {
            return Err(Error::aggregate("rewriting shoot secrets", errors));
        }

        let annotation_patch =
            json!({ "metadata": { "annotations": { ETCD_ENCRYPTION_CHECKSUM_ANNOTATION: checksum } } });
        self.seed
            .merge_patch_secret(&namespace, ETCD_ENCRYPTION_SECRET_NAME, &annotation_patch)
            .await?;

        info!(%checksum, secrets = stale.len(), "Rewrote shoot secrets under current etcd encryption");
        Ok(RewriteOutcome::Rewritten {
            secrets: stale.len(),
        })
    }
}
