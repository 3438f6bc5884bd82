//! Store clients for Shoots, Secrets and OperatingSystemConfigs
//!
//! Each store is a trait so the controllers can be tested against mocks or
//! in-memory fakes; the `*Impl` types talk to a real API server. Lookups map
//! 404 to `Ok(None)`; writes surface 404/409 as errors which callers classify
//! with [`Error::is_not_found`] and [`Error::is_conflict`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use canopy_common::crd::{CloudProfile, OperatingSystemConfig, Shoot};
use canopy_common::retry::{retry_with_backoff_if, RetryConfig};
use canopy_common::{Error, Result};

/// Shoot and CloudProfile access in the garden cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShootClient: Send + Sync {
    /// Get a Shoot by namespace and name
    async fn get_shoot(&self, namespace: &str, name: &str) -> Result<Option<Shoot>>;

    /// Replace a Shoot, guarded by its `resourceVersion`
    async fn replace_shoot(&self, shoot: &Shoot) -> Result<Shoot>;

    /// Get a CloudProfile by name
    async fn get_cloud_profile(&self, name: &str) -> Result<Option<CloudProfile>>;
}

/// Secret access in one cluster (garden, seed or shoot)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Replace a Secret, guarded by its `resourceVersion`
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret>;

    /// List Secrets matching `label_selector`, in one namespace or all
    async fn list_secrets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Secret>>;

    /// Apply a JSON merge patch to a Secret
    async fn merge_patch_secret(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;
}

/// OperatingSystemConfig access in a seed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OscClient: Send + Sync {
    /// Get an OperatingSystemConfig by namespace and name
    async fn get_osc(&self, namespace: &str, name: &str) -> Result<Option<OperatingSystemConfig>>;
}

/// Real garden-cluster client
pub struct ShootClientImpl {
    client: Client,
}

impl ShootClientImpl {
    /// Create a new ShootClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ShootClient for ShootClientImpl {
    async fn get_shoot(&self, namespace: &str, name: &str) -> Result<Option<Shoot>> {
        let api: Api<Shoot> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_shoot(&self, shoot: &Shoot) -> Result<Shoot> {
        let namespace = shoot.namespace().unwrap_or_default();
        let api: Api<Shoot> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&shoot.name_any(), &PostParams::default(), shoot)
            .await?)
    }

    async fn get_cloud_profile(&self, name: &str) -> Result<Option<CloudProfile>> {
        let api: Api<CloudProfile> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}

/// Real Secret client
pub struct SecretClientImpl {
    client: Client,
}

impl SecretClientImpl {
    /// Create a new SecretClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretClient for SecretClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .create(&PostParams::default(), secret)
            .await?)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?)
    }

    async fn list_secrets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Secret>> {
        let api: Api<Secret> = match namespace {
            Some(ns) => self.api(&ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn merge_patch_secret(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Real OperatingSystemConfig client
pub struct OscClientImpl {
    client: Client,
}

impl OscClientImpl {
    /// Create a new OscClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OscClient for OscClientImpl {
    async fn get_osc(&self, namespace: &str, name: &str) -> Result<Option<OperatingSystemConfig>> {
        let api: Api<OperatingSystemConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Read-modify-write a Shoot, retrying on write conflicts.
///
/// `mutate` sees the freshly read object on every attempt. An error from
/// `mutate` aborts without retry and without writing.
pub async fn try_update_shoot<F>(
    client: &dyn ShootClient,
    retry: &RetryConfig,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Shoot>
where
    F: Fn(&mut Shoot) -> Result<()> + Send + Sync,
{
    let mutate = &mutate;
    retry_with_backoff_if(
        retry,
        "update_shoot",
        move || async move {
            let mut shoot = client
                .get_shoot(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(format!("shoot {}/{}", namespace, name)))?;
            mutate(&mut shoot)?;
            client.replace_shoot(&shoot).await
        },
        Error::is_conflict,
    )
    .await
}

/// Create a Secret or update the existing one, retrying on write conflicts.
///
/// `mutate` receives the current object (or an empty one carrying only the
/// name and namespace) and a flag telling whether it already existed.
pub async fn create_or_update_secret<F>(
    client: &dyn SecretClient,
    retry: &RetryConfig,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Secret>
where
    F: Fn(&mut Secret, bool) -> Result<()> + Send + Sync,
{
    let mutate = &mutate;
    retry_with_backoff_if(
        retry,
        "create_or_update_secret",
        move || async move {
            match client.get_secret(namespace, name).await? {
                Some(mut secret) => {
                    mutate(&mut secret, true)?;
                    client.replace_secret(&secret).await
                }
                None => {
                    let mut secret = Secret {
                        metadata: ObjectMeta {
                            name: Some(name.to_string()),
                            namespace: Some(namespace.to_string()),
                            ..Default::default()
                        },
                        ..Default::default()
                    };
                    mutate(&mut secret, false)?;
                    debug!(%namespace, %name, "Creating secret");
                    client.create_secret(&secret).await
                }
            }
        },
        Error::is_conflict,
    )
    .await
}
