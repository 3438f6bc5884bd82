//! Common types for Canopy: resource definitions, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod random;
pub mod retry;
pub mod telemetry;
pub mod template;

pub use error::{ignore_not_found, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding cluster-wide system objects (bootstrap tokens, cloud-config execution)
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Annotation carrying an operation request for a Shoot (`maintain`, `reconcile`)
pub const SHOOT_OPERATION_ANNOTATION: &str = "shoot.canopy.dev/operation";

/// Operation value requesting an immediate maintenance pass
pub const SHOOT_OPERATION_MAINTAIN: &str = "maintain";

/// Operation value requesting a full reconciliation
pub const SHOOT_OPERATION_RECONCILE: &str = "reconcile";

/// Annotation listing comma-separated tasks the next reconciliation must run
pub const SHOOT_TASKS_ANNOTATION: &str = "shoot.canopy.dev/tasks";

/// Task forcing the infrastructure to be redeployed
pub const SHOOT_TASK_DEPLOY_INFRASTRUCTURE: &str = "deployInfrastructure";

/// Task forcing the kube2iam resources to be redeployed
pub const SHOOT_TASK_DEPLOY_KUBE2IAM_RESOURCE: &str = "deployKube2IAMResource";

/// Annotation excluding a Shoot from automated operations
pub const SHOOT_IGNORE_ANNOTATION: &str = "shoot.canopy.dev/ignore";

/// Name of the Secret holding the etcd encryption configuration in the seed namespace
pub const ETCD_ENCRYPTION_SECRET_NAME: &str = "etcd-encryption-secret";

/// Annotation recording the checksum of the last fully rolled-out encryption configuration
pub const ETCD_ENCRYPTION_CHECKSUM_ANNOTATION: &str =
    "shoot.canopy.dev/etcd-encryption-configuration-checksum";

/// Label stamped on every shoot Secret rewritten under the current encryption configuration
pub const ETCD_ENCRYPTION_CHECKSUM_LABEL: &str =
    "shoot.canopy.dev/etcd-encryption-configuration-checksum";

/// Annotation forcing the API servers to keep writing secrets in plaintext
pub const ETCD_ENCRYPTION_FORCE_PLAINTEXT_ANNOTATION: &str =
    "shoot.canopy.dev/etcd-encryption-force-plaintext-secrets";

/// Resource type whose encryption is managed
pub const ETCD_ENCRYPTION_RESOURCE_SECRETS: &str = "secrets";

/// Label key for resources managed by Canopy
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by Canopy
pub const LABEL_MANAGED_BY_CANOPY: &str = "canopy";

/// Backup key of the encryption configuration in the garden store.
///
/// Returns `(namespace, name)` for the shoot identified by `shoot_namespace/shoot_name`.
pub fn garden_etcd_encryption_secret_key(shoot_namespace: &str, shoot_name: &str) -> (String, String) {
    (
        shoot_namespace.to_string(),
        format!("{}.etcdencryption", shoot_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garden_backup_key_is_derived_from_shoot_identity() {
        let (ns, name) = garden_etcd_encryption_secret_key("garden-dev", "web");
        assert_eq!(ns, "garden-dev");
        assert_eq!(name, "web.etcdencryption");
    }
}
