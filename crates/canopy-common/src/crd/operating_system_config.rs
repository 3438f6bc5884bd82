//! OperatingSystemConfig Custom Resource Definition
//!
//! Declarative request for a node configuration. An OS extension reconciles
//! it and publishes the rendered cloud-config as a Secret referenced from the
//! status.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an OperatingSystemConfig
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "extensions.canopy.dev",
    version = "v1alpha1",
    kind = "OperatingSystemConfig",
    plural = "operatingsystemconfigs",
    shortname = "osc",
    namespaced,
    status = "OperatingSystemConfigStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Purpose","type":"string","jsonPath":".spec.purpose"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.lastOperation.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemConfigSpec {
    /// Machine image the configuration targets
    #[serde(rename = "type")]
    pub type_: String,

    /// `provision` (downloader) or `reconcile` (original)
    pub purpose: String,

    /// Path the node agent reloads the configuration from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_config_file_path: Option<String>,
}

/// State of the last operation run by the extension
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LastOperationState {
    /// Queued
    Pending,
    /// Running
    Processing,
    /// Finished successfully
    Succeeded,
    /// Failed, will be retried
    Error,
    /// Failed permanently
    Failed,
}

/// Last operation run by the extension
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LastOperation {
    /// Operation state
    pub state: LastOperationState,
    /// Human-readable progress description
    #[serde(default)]
    pub description: String,
}

/// Last error reported by the extension
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LastError {
    /// Error description
    pub description: String,
}

/// Reference to a Secret in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretReference {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

/// Where the rendered cloud-config was published
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfigStatus {
    /// Secret holding the rendered configuration under key `cloud_config`
    pub secret_ref: SecretReference,
}

/// Status of an OperatingSystemConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemConfigStatus {
    /// Last operation run by the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Last error reported by the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// Generation last processed by the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Published cloud-config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<CloudConfigStatus>,

    /// Command to run the configuration on the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// systemd units the configuration manages
    #[serde(default)]
    pub units: Vec<String>,
}

impl OperatingSystemConfig {
    /// Why the extension has not finished with this object yet.
    ///
    /// `None` once the last operation succeeded without error for the
    /// current generation.
    pub fn not_ready_reason(&self) -> Option<String> {
        let name = self.name_any();
        let Some(status) = self.status.as_ref() else {
            return Some(format!("{} has no status yet", name));
        };
        if let Some(err) = &status.last_error {
            return Some(format!("{} reports error: {}", name, err.description));
        }
        match &status.last_operation {
            None => return Some(format!("{} has no last operation yet", name)),
            Some(op) if op.state != LastOperationState::Succeeded => {
                return Some(format!(
                    "{} last operation is {:?}: {}",
                    name, op.state, op.description
                ))
            }
            Some(_) => {}
        }
        if status.observed_generation != self.metadata.generation {
            return Some(format!(
                "{} observed generation {:?} is behind {:?}",
                name, status.observed_generation, self.metadata.generation
            ));
        }
        None
    }
}
