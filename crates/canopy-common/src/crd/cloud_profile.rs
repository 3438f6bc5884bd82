//! CloudProfile Custom Resource Definition
//!
//! Catalog of Kubernetes versions, machine images and machine types a Shoot
//! may use.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::MachineImage;

/// Specification for a CloudProfile
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "canopy.dev",
    version = "v1beta1",
    kind = "CloudProfile",
    plural = "cloudprofiles",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfileSpec {
    /// Kubernetes version constraints
    pub kubernetes: KubernetesConstraints,

    /// Offered machine images, one current version per image name
    #[serde(default)]
    pub machine_images: Vec<MachineImage>,

    /// Offered machine types
    #[serde(default)]
    pub machine_types: Vec<MachineType>,

    /// PEM bundle of additional CAs trusted by nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Kubernetes version constraints
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct KubernetesConstraints {
    /// Allowed versions, in no particular order
    #[serde(default)]
    pub versions: Vec<String>,
}

/// A machine type offered by the provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MachineType {
    /// Type name (e.g. "m5.large")
    pub name: String,
    /// CPU quantity
    pub cpu: String,
    /// Memory quantity (e.g. "16Gi")
    pub memory: String,
    /// Whether new workers may use this type
    #[serde(default = "default_true")]
    pub usable: bool,
}

fn default_true() -> bool {
    true
}

impl CloudProfileSpec {
    /// Look up a machine type by name
    pub fn machine_type(&self, name: &str) -> Option<&MachineType> {
        self.machine_types.iter().find(|t| t.name == name)
    }
}
