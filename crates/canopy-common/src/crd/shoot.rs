//! Shoot Custom Resource Definition
//!
//! A Shoot is a managed Kubernetes cluster. Its control plane runs in a
//! namespace of the Seed it is scheduled onto.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{SHOOT_IGNORE_ANNOTATION, SHOOT_OPERATION_ANNOTATION, SHOOT_OPERATION_MAINTAIN};

/// Maintenance window start used when a Shoot does not configure one
pub const DEFAULT_MAINTENANCE_BEGIN: &str = "220000+0000";
/// Maintenance window end used when a Shoot does not configure one
pub const DEFAULT_MAINTENANCE_END: &str = "230000+0000";
/// Service network used when a Shoot does not configure one
pub const DEFAULT_SERVICE_CIDR: &str = "100.64.0.0/13";

/// Specification for a Shoot
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "canopy.dev",
    version = "v1beta1",
    kind = "Shoot",
    plural = "shoots",
    namespaced,
    status = "ShootStatus",
    printcolumn = r#"{"name":"Profile","type":"string","jsonPath":".spec.cloud.profile"}"#,
    printcolumn = r#"{"name":"Seed","type":"string","jsonPath":".spec.cloud.seed"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetes.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// Infrastructure placement and worker pools
    pub cloud: CloudSpec,

    /// Kubernetes version and component settings
    pub kubernetes: KubernetesSpec,

    /// Service network configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<NetworkingSpec>,

    /// DNS settings of the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSpec>,

    /// Maintenance window and automatic update policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<MaintenanceSpec>,
}

/// Infrastructure placement of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSpec {
    /// Name of the CloudProfile constraining this Shoot
    pub profile: String,

    /// Seed the control plane is scheduled onto; unset until scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,

    /// Machine image used by all workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_image: Option<MachineImage>,

    /// Worker pools
    #[serde(default)]
    pub workers: Vec<Worker>,
}

/// A named, versioned machine image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct MachineImage {
    /// Image name (e.g. "coreos")
    pub name: String,
    /// Image version
    pub version: String,
}

/// A worker pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    /// Pool name, unique within the Shoot
    pub name: String,
    /// Machine type from the CloudProfile
    pub machine_type: String,
    /// Minimum number of machines
    #[serde(default)]
    pub minimum: u32,
    /// Maximum number of machines
    #[serde(default)]
    pub maximum: u32,
}

/// Kubernetes settings of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    /// Semantic version, e.g. "1.15.1"
    pub version: String,

    /// Kubelet overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfig>,
}

/// Kubelet overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfig {
    /// Feature gates to enable or disable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_gates: Option<BTreeMap<String, bool>>,

    /// Maximum number of PIDs per pod
    #[serde(
        default,
        rename = "podPIDsLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub pod_pids_limit: Option<i64>,

    /// Whether CPU CFS quota enforcement is enabled
    #[serde(
        default,
        rename = "cpuCFSQuota",
        skip_serializing_if = "Option::is_none"
    )]
    pub cpu_cfs_quota: Option<bool>,

    /// CPU manager policy ("none" or "static")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_manager_policy: Option<String>,
}

/// Service network of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct NetworkingSpec {
    /// Service CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<String>,
}

/// DNS settings of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DnsSpec {
    /// External domain; the API server is reachable at `api.<domain>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Maintenance settings of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSpec {
    /// Daily window in which automated updates may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<MaintenanceTimeWindow>,

    /// Which automated updates are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<MaintenanceAutoUpdate>,
}

/// Daily maintenance window, `HHMMSS+ZZZZ` on both ends
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct MaintenanceTimeWindow {
    /// Start of the window
    pub begin: String,
    /// End of the window; before `begin` means the window wraps past midnight
    pub end: String,
}

impl Default for MaintenanceTimeWindow {
    fn default() -> Self {
        Self {
            begin: DEFAULT_MAINTENANCE_BEGIN.to_string(),
            end: DEFAULT_MAINTENANCE_END.to_string(),
        }
    }
}

/// Automated update policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceAutoUpdate {
    /// Move to the latest patch version of the current minor line
    #[serde(default)]
    pub kubernetes_version: bool,
}

/// Status of a Shoot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    /// Name of the control-plane namespace in the Seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_id: Option<String>,

    /// Generation last processed by the reconciler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Shoot {
    /// `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Control-plane namespace of this Shoot in its Seed.
    ///
    /// `status.technicalID` when recorded, otherwise `shoot--<project>--<name>`
    /// where the project is the namespace without its `garden-` prefix.
    pub fn seed_namespace(&self) -> String {
        if let Some(id) = self.status.as_ref().and_then(|s| s.technical_id.as_ref()) {
            return id.clone();
        }
        let namespace = self.namespace().unwrap_or_default();
        let project = namespace.strip_prefix("garden-").unwrap_or(&namespace);
        format!("shoot--{}--{}", project, self.name_any())
    }

    /// Whether deletion of this Shoot is in progress
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the Shoot asks for an immediate maintenance pass
    pub fn has_maintain_now_annotation(&self) -> bool {
        self.annotations().get(SHOOT_OPERATION_ANNOTATION).map(String::as_str)
            == Some(SHOOT_OPERATION_MAINTAIN)
    }

    /// Whether the Shoot opted out of automated operations
    pub fn has_ignore_annotation(&self) -> bool {
        self.annotations().get(SHOOT_IGNORE_ANNOTATION).map(String::as_str) == Some("true")
    }

    /// Configured maintenance window, or the default one
    pub fn maintenance_time_window(&self) -> MaintenanceTimeWindow {
        self.spec
            .maintenance
            .as_ref()
            .and_then(|m| m.time_window.clone())
            .unwrap_or_default()
    }

    /// Configured auto-update policy, or the all-off default
    pub fn auto_update(&self) -> MaintenanceAutoUpdate {
        self.spec
            .maintenance
            .as_ref()
            .and_then(|m| m.auto_update.clone())
            .unwrap_or_default()
    }

    /// Service network CIDR
    pub fn service_cidr(&self) -> &str {
        self.spec
            .networking
            .as_ref()
            .and_then(|n| n.services.as_deref())
            .unwrap_or(DEFAULT_SERVICE_CIDR)
    }
}
