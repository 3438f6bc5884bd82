//! Per-worker cloud-config generation
//!
//! Every worker pool gets a downloader and an original
//! OperatingSystemConfig in the seed namespace. Both are applied, awaited
//! until their extension published the rendered cloud-config, and read
//! back. Workers run concurrently; results of the workers that succeeded
//! are committed even when others fail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use canopy_common::crd::{CloudProfileSpec, OperatingSystemConfig, Shoot};
use canopy_common::kube_utils::poll_until;
use canopy_common::template::{ChartApplier, Values};
use canopy_common::{Error, Result};

use super::values::{
    cloud_config_secret_name, downloader_values, original_values, worker_downloader_values,
    worker_original_values,
};
use crate::client::{OscClient, SecretClient};

/// Chart holding the `downloader` and `original` OperatingSystemConfig templates
pub const OSC_CHART_PATH: &str = "seed-operatingsystemconfig";

/// Data key of the Secret an extension publishes the cloud-config into
pub const CLOUD_CONFIG_DATA_KEY: &str = "cloud_config";

/// How long and how often to wait for an extension
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Delay between two reads of the OperatingSystemConfig
    pub interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A rendered cloud-config with the instructions to run it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudConfigData {
    /// The cloud-config document
    pub content: String,
    /// Command executing the configuration on the node
    pub command: Option<String>,
    /// systemd units the configuration manages
    pub units: Vec<String>,
}

/// Both cloud-configs of one worker pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudConfig {
    /// Bootstrap configuration fetching the original
    pub downloader: CloudConfigData,
    /// Full node configuration
    pub original: CloudConfigData,
}

/// Generated cloud-configs keyed by worker name
#[derive(Clone, Debug, Default)]
pub struct CloudConfigMap {
    inner: Arc<RwLock<BTreeMap<String, CloudConfig>>>,
}

impl CloudConfigMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloud-configs of `worker`, if generated
    pub fn get(&self, worker: &str) -> Option<CloudConfig> {
        self.inner.read().get(worker).cloned()
    }

    /// Names of all workers with a generated configuration
    pub fn workers(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Replace the map with the outcome of one pass. Workers that failed or
    /// left the Shoot have no entry afterwards.
    fn commit(&self, generated: Vec<(String, CloudConfig)>) {
        *self.inner.write() = generated.into_iter().collect();
    }
}

/// Fans out cloud-config generation over a Shoot's worker pools
pub struct WorkerOSConfigPipeline {
    generator: Generator,
    results: CloudConfigMap,
}

impl WorkerOSConfigPipeline {
    /// Create a pipeline writing into `results`
    pub fn new(
        seed_secrets: Arc<dyn SecretClient>,
        oscs: Arc<dyn OscClient>,
        charts: Arc<dyn ChartApplier>,
        results: CloudConfigMap,
    ) -> Self {
        Self {
            generator: Generator {
                secrets: seed_secrets,
                oscs,
                charts,
                poll: PollConfig::default(),
            },
            results,
        }
    }

    /// Override the readiness poll
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.generator.poll = poll;
        self
    }

    /// Map the pipeline commits into
    pub fn results(&self) -> &CloudConfigMap {
        &self.results
    }

    /// Generate the cloud-configs of every worker pool of `shoot`.
    ///
    /// The result map is overwritten with the workers that succeeded in this
    /// pass. Workers that failed or are no longer in the Shoot lose their
    /// previous entry. If any worker fails, an aggregate error naming every
    /// failed worker is returned.
    #[instrument(skip_all, fields(shoot = %shoot.key()))]
    pub async fn compute_all(
        &self,
        shoot: &Shoot,
        profile: &CloudProfileSpec,
        kubelet_ca_cert: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let downloader = downloader_values(shoot)?;
        let original = original_values(shoot, profile, kubelet_ca_cert)?;
        let namespace = shoot.seed_namespace();

        let mut tasks = JoinSet::new();
        for worker in &shoot.spec.cloud.workers {
            let generator = self.generator.clone();
            let namespace = namespace.clone();
            let name = worker.name.clone();
            let downloader = worker_downloader_values(&downloader, worker);
            let original = worker_original_values(&original, shoot, profile, worker);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = match original {
                    Ok(original) => {
                        generator
                            .generate(&namespace, &name, &downloader, &original, &cancel)
                            .await
                    }
                    Err(e) => Err(e),
                };
                (name, result)
            });
        }

        let mut generated = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((worker, Ok(config))) => {
                    debug!(%worker, "Generated cloud-config");
                    generated.push((worker, config));
                }
                Ok((worker, Err(e))) => {
                    warn!(%worker, error = %e, "Failed to generate cloud-config");
                    errors.push(Error::aggregate(format!("worker {}", worker), vec![e]));
                }
                Err(e) => errors.push(Error::internal_with_context(
                    "operating system config generation",
                    format!("worker task failed: {}", e),
                )),
            }
        }

        let succeeded = generated.len();
        self.results.commit(generated);

        if errors.is_empty() {
            info!(workers = succeeded, "Generated cloud-configs for all workers");
            Ok(())
        } else {
            Err(Error::aggregate("operating system config generation", errors))
        }
    }
}

#[derive(Clone)]
struct Generator {
    secrets: Arc<dyn SecretClient>,
    oscs: Arc<dyn OscClient>,
    charts: Arc<dyn ChartApplier>,
    poll: PollConfig,
}

impl Generator {
    async fn generate(
        &self,
        namespace: &str,
        worker: &str,
        downloader: &Values,
        original: &Values,
        cancel: &CancellationToken,
    ) -> Result<CloudConfig> {
        let secret_name = cloud_config_secret_name(worker);
        let downloader = self
            .apply_and_wait(namespace, "downloader", &secret_name, downloader, cancel)
            .await?;
        let original = self
            .apply_and_wait(namespace, "original", &secret_name, original, cancel)
            .await?;
        Ok(CloudConfig {
            downloader,
            original,
        })
    }

    async fn apply_and_wait(
        &self,
        namespace: &str,
        flavour: &str,
        secret_name: &str,
        values: &Values,
        cancel: &CancellationToken,
    ) -> Result<CloudConfigData> {
        let chart = format!("{}/{}", OSC_CHART_PATH, flavour);
        let release = format!("{}-{}", secret_name, flavour);
        self.charts.apply(&chart, namespace, &release, values).await?;

        let ready = Mutex::new(None);
        let (oscs, ready_ref, release_ref) = (&self.oscs, &ready, release.as_str());
        poll_until(
            self.poll.timeout,
            self.poll.interval,
            format!("waiting for operating system config {}/{}", namespace, release),
            cancel,
            move || async move {
                let osc = oscs.get_osc(namespace, release_ref).await?.ok_or_else(|| {
                    Error::not_found(format!("operatingsystemconfig {}/{}", namespace, release_ref))
                })?;
                match osc.not_ready_reason() {
                    Some(reason) => {
                        debug!(%reason, "Operating system config not ready yet");
                        Ok(false)
                    }
                    None => {
                        *ready_ref.lock() = Some(osc);
                        Ok(true)
                    }
                }
            },
        )
        .await?;

        let osc = ready.into_inner().ok_or_else(|| {
            Error::internal_with_context("operating system config generation", "ready object lost")
        })?;
        self.read_cloud_config(&osc).await
    }

    async fn read_cloud_config(&self, osc: &OperatingSystemConfig) -> Result<CloudConfigData> {
        let status = osc.status.clone().unwrap_or_default();
        let secret_ref = status
            .cloud_config
            .map(|c| c.secret_ref)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "cloud config reference of operatingsystemconfig {}",
                    osc.metadata.name.as_deref().unwrap_or_default()
                ))
            })?;

        let secret = self
            .secrets
            .get_secret(&secret_ref.namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("secret {}/{}", secret_ref.namespace, secret_ref.name))
            })?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(CLOUD_CONFIG_DATA_KEY))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "key {} of secret {}/{}",
                    CLOUD_CONFIG_DATA_KEY, secret_ref.namespace, secret_ref.name
                ))
            })?;
        let content = String::from_utf8(raw.0.clone())
            .map_err(|e| Error::serialization(format!("cloud config is not UTF-8: {}", e)))?;

        Ok(CloudConfigData {
            content,
            command: status.command,
            units: status.units,
        })
    }
}
