//! Chart values for the downloader and original OperatingSystemConfigs
//!
//! The shared part is computed once per Shoot; each worker adds its own
//! keys on top with a shallow merge.

use canopy_common::crd::{CloudProfileSpec, Shoot, Worker};
use canopy_common::kube_utils::nth_ip_in_cidr;
use canopy_common::template::{merge, values, TemplateValue, Values};
use canopy_common::{Error, Result};

use super::eviction::eviction_memory_available;

/// Where the downloader stores the original cloud-config on the node
pub const CLOUD_CONFIG_FILE_PATH: &str = "/var/lib/cloud-config-downloader/downloads/cloud_config";

/// Cluster-internal DNS domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Purpose of the downloader configuration
pub const PURPOSE_PROVISION: &str = "provision";

/// Purpose of the original configuration
pub const PURPOSE_RECONCILE: &str = "reconcile";

/// Name of the shoot Secret carrying a worker's cloud-config
pub fn cloud_config_secret_name(worker: &str) -> String {
    format!("cloud-config-{}", worker)
}

/// Name of the machine image all workers boot
pub fn machine_image_name(shoot: &Shoot) -> Result<&str> {
    shoot
        .spec
        .cloud
        .machine_image
        .as_ref()
        .map(|image| image.name.as_str())
        .ok_or_else(|| Error::validation_for(shoot.key(), "shoot has no machine image"))
}

/// Values shared by every worker's downloader configuration
pub fn downloader_values(shoot: &Shoot) -> Result<Values> {
    let domain = shoot
        .spec
        .dns
        .as_ref()
        .and_then(|dns| dns.domain.as_deref())
        .ok_or_else(|| Error::validation_for(shoot.key(), "shoot has no DNS domain"))?;

    Ok(values([
        ("type", machine_image_name(shoot)?.to_string()),
        ("purpose", PURPOSE_PROVISION.to_string()),
        ("server", format!("https://api.{}", domain)),
    ]))
}

/// Values shared by every worker's original configuration
pub fn original_values(
    shoot: &Shoot,
    profile: &CloudProfileSpec,
    kubelet_ca_cert: &str,
) -> Result<Values> {
    let cluster_dns = nth_ip_in_cidr(shoot.service_cidr(), 10)?;

    let mut kubelet = values([("caCert", kubelet_ca_cert)]);
    if let Some(config) = &shoot.spec.kubernetes.kubelet {
        if let Some(gates) = &config.feature_gates {
            let gates = gates.iter().map(|(gate, on)| (gate.clone(), TemplateValue::Bool(*on)));
            kubelet.insert("featureGates".to_string(), TemplateValue::map(gates));
        }
        if let Some(limit) = config.pod_pids_limit {
            kubelet.insert("podPIDsLimit".to_string(), limit.into());
        }
        if let Some(quota) = config.cpu_cfs_quota {
            kubelet.insert("cpuCFSQuota".to_string(), quota.into());
        }
        if let Some(policy) = &config.cpu_manager_policy {
            kubelet.insert("cpuManagerPolicy".to_string(), policy.clone().into());
        }
    }

    let mut original = values([(
        "kubernetes",
        TemplateValue::map([
            ("clusterDNS", TemplateValue::from(cluster_dns.to_string())),
            ("domain", DEFAULT_CLUSTER_DOMAIN.into()),
            ("kubelet", kubelet.into()),
            ("version", shoot.spec.kubernetes.version.clone().into()),
        ]),
    )]);
    if let Some(bundle) = &profile.ca_bundle {
        original.insert("caBundle".to_string(), bundle.clone().into());
    }
    Ok(original)
}

/// `base` plus the worker's `secretName`
pub fn worker_downloader_values(base: &Values, worker: &Worker) -> Values {
    merge(
        base,
        &values([("secretName", cloud_config_secret_name(&worker.name))]),
    )
}

/// `base` plus the worker's `osc` and `worker` sections
pub fn worker_original_values(
    base: &Values,
    shoot: &Shoot,
    profile: &CloudProfileSpec,
    worker: &Worker,
) -> Result<Values> {
    let (hard, soft) = eviction_memory_available(&profile.machine_types, &worker.machine_type)?;
    let secret_name = cloud_config_secret_name(&worker.name);
    let overlay = values([
        (
            "osc",
            TemplateValue::map([
                ("type", machine_image_name(shoot)?),
                ("purpose", PURPOSE_RECONCILE),
                ("reloadConfigFilePath", CLOUD_CONFIG_FILE_PATH),
                ("secretName", secret_name.as_str()),
            ]),
        ),
        (
            "worker",
            TemplateValue::map([
                ("name", worker.name.as_str()),
                ("evictionHardMemoryAvailable", hard),
                ("evictionSoftMemoryAvailable", soft),
            ]),
        ),
    ]);
    Ok(merge(base, &overlay))
}
