//! Cloud-config execution manifests for the shoot's `kube-system`

use canopy_common::crd::Shoot;
use canopy_common::template::{values, ChartApplier, RenderedChart, TemplateValue};
use canopy_common::{Error, Result, KUBE_SYSTEM_NAMESPACE};
use tracing::debug;

use super::bootstrap_token::BootstrapToken;
use super::pipeline::CloudConfigMap;
use super::values::{cloud_config_secret_name, CLOUD_CONFIG_FILE_PATH};

/// Chart rendering the cloud-config Secrets and their executor
pub const CLOUD_CONFIG_EXECUTION_CHART: &str = "shoot-cloud-config";

/// Release name of the rendered chart
pub const CLOUD_CONFIG_EXECUTION_RELEASE: &str = "shoot-cloud-config-execution";

/// Render, without applying, the manifests that hand each worker its
/// original cloud-config and let joining nodes authenticate with `token`.
///
/// Every worker of `shoot` must have a generated cloud-config in `cloud_configs`.
pub fn render_cloud_config_execution(
    charts: &dyn ChartApplier,
    shoot: &Shoot,
    token: &BootstrapToken,
    cloud_configs: &CloudConfigMap,
) -> Result<RenderedChart> {
    let workers = shoot
        .spec
        .cloud
        .workers
        .iter()
        .map(|worker| {
            let config = cloud_configs.get(&worker.name).ok_or_else(|| {
                Error::not_found(format!("cloud config of worker {}", worker.name))
            })?;
            let original = config.original;
            let mut entry = values([
                ("name", TemplateValue::from(worker.name.clone())),
                ("secretName", cloud_config_secret_name(&worker.name).into()),
                ("cloudConfig", original.content.into()),
                (
                    "units",
                    original
                        .units
                        .into_iter()
                        .map(TemplateValue::from)
                        .collect::<Vec<_>>()
                        .into(),
                ),
            ]);
            if let Some(command) = original.command {
                entry.insert("command".to_string(), command.into());
            }
            Ok(TemplateValue::Map(entry))
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(shoot = %shoot.key(), workers = workers.len(), "Rendering cloud-config execution");
    let chart_values = values([
        ("bootstrapToken", TemplateValue::from(token.token())),
        ("configFilePath", CLOUD_CONFIG_FILE_PATH.into()),
        ("workers", workers.into()),
    ]);
    charts.render(
        CLOUD_CONFIG_EXECUTION_CHART,
        KUBE_SYSTEM_NAMESPACE,
        CLOUD_CONFIG_EXECUTION_RELEASE,
        &chart_values,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use canopy_common::crd::CloudProfileSpec;
    use crate::client::MockOscClient;
    use crate::osc::WorkerOSConfigPipeline;
    use crate::testing::{
        cloud_config_secret, provisionable_shoot, ready_osc, InMemorySecrets, MockChartApplier,
    };

    fn token() -> BootstrapToken {
        BootstrapToken {
            id: "abc123".to_string(),
            secret: "0123456789abcdef".to_string(),
            expiration: Utc.with_ymd_and_hms(2019, 6, 5, 10, 0, 0).unwrap(),
        }
    }

    async fn generated(shoot: &Shoot) -> CloudConfigMap {
        let ns = shoot.seed_namespace();
        let secrets = InMemorySecrets::default();
        for worker in &shoot.spec.cloud.workers {
            for flavour in ["downloader", "original"] {
                let name = format!("cloud-config-{}-{}", worker.name, flavour);
                secrets.insert(cloud_config_secret(&ns, &name, &format!("#{}", name)));
            }
        }
        let mut oscs = MockOscClient::new();
        oscs.expect_get_osc().returning(|ns, name| {
            Ok(Some(ready_osc(ns, name, Some("/bin/run"), &["kubelet.service"])))
        });
        let mut charts = MockChartApplier::new();
        charts.expect_apply().returning(|_, _, _, _| Ok(()));

        let results = CloudConfigMap::new();
        let profile: CloudProfileSpec =
            serde_json::from_value(serde_json::json!({"kubernetes": {"versions": []}})).unwrap();
        let pipeline = WorkerOSConfigPipeline::new(
            Arc::new(secrets),
            Arc::new(oscs),
            Arc::new(charts),
            results.clone(),
        );
        pipeline
            .compute_all(shoot, &profile, "ca", &CancellationToken::new())
            .await
            .unwrap();
        results
    }

    /// Story: generated original cloud-configs flow into the execution chart
    #[tokio::test]
    async fn story_execution_chart_carries_each_workers_original_config() {
        let shoot = provisionable_shoot("garden-dev", "web", &["pool-a", "pool-b"]);
        let cloud_configs = generated(&shoot).await;

        let mut charts = MockChartApplier::new();
        charts
            .expect_render()
            .withf(|chart, ns, release, _| {
                chart == CLOUD_CONFIG_EXECUTION_CHART
                    && ns == "kube-system"
                    && release == CLOUD_CONFIG_EXECUTION_RELEASE
            })
            .returning(|_, _, _, values| {
                Ok(RenderedChart {
                    name: "shoot-cloud-config".to_string(),
                    files: BTreeMap::from([(
                        "values.yaml".to_string(),
                        serde_yaml::to_string(values).unwrap(),
                    )]),
                })
            });

        let rendered =
            render_cloud_config_execution(&charts, &shoot, &token(), &cloud_configs).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered.files["values.yaml"]).unwrap();

        assert_eq!(doc["bootstrapToken"].as_str(), Some("abc123.0123456789abcdef"));
        assert_eq!(doc["configFilePath"].as_str(), Some(CLOUD_CONFIG_FILE_PATH));
        let workers = doc["workers"].as_sequence().unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0]["name"].as_str(), Some("pool-a"));
        assert_eq!(workers[0]["secretName"].as_str(), Some("cloud-config-pool-a"));
        assert_eq!(
            workers[0]["cloudConfig"].as_str(),
            Some("#cloud-config-pool-a-original")
        );
        assert_eq!(workers[0]["command"].as_str(), Some("/bin/run"));
        assert_eq!(workers[0]["units"][0].as_str(), Some("kubelet.service"));
        assert_eq!(workers[1]["name"].as_str(), Some("pool-b"));
    }

    #[tokio::test]
    async fn worker_without_cloud_config_is_an_error() {
        let shoot = provisionable_shoot("garden-dev", "web", &["pool-a"]);
        let cloud_configs = generated(&shoot).await;
        let grown = provisionable_shoot("garden-dev", "web", &["pool-a", "pool-z"]);

        let charts = MockChartApplier::new();
        let err = render_cloud_config_execution(&charts, &grown, &token(), &cloud_configs)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("pool-z"));
    }
}
