//! A single maintenance pass over one Shoot
//!
//! Looks up a newer machine image and, when the Shoot opted in, a newer
//! Kubernetes patch version in its CloudProfile, then commits them together
//! with a reconcile request. The auto-update policy is re-checked on the
//! fresh object so a concurrent user edit of that very policy aborts the
//! write instead of being raced.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use canopy_common::crd::{CloudProfile, MachineImage, Shoot};
use canopy_common::events::{actions, operation_note, reasons, EventPublisher};
use canopy_common::random::operation_id;
use canopy_common::retry::RetryConfig;
use canopy_common::{
    Error, Result, SHOOT_OPERATION_ANNOTATION, SHOOT_OPERATION_RECONCILE, SHOOT_TASKS_ANNOTATION,
    SHOOT_TASK_DEPLOY_INFRASTRUCTURE, SHOOT_TASK_DEPLOY_KUBE2IAM_RESOURCE,
};

use super::versions::{determine_latest_patch_version, determine_machine_image};
use crate::client::{try_update_shoot, ShootClient};

const SUCCESS_MESSAGE: &str = "Completed; updated the Shoot specification successfully.";

/// Changes staged for one Shoot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaintenancePlan {
    /// Machine image to switch to
    pub machine_image: Option<MachineImage>,
    /// Kubernetes version to switch to
    pub kubernetes_version: Option<String>,
}

/// Runs maintenance passes
pub struct MaintenanceControl {
    shoots: Arc<dyn ShootClient>,
    events: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl MaintenanceControl {
    /// Create a new MaintenanceControl
    pub fn new(
        shoots: Arc<dyn ShootClient>,
        events: Arc<dyn EventPublisher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            shoots,
            events,
            retry,
        }
    }

    /// Maintain `shoot`.
    ///
    /// Emits `MaintenanceDone` or `MaintenanceError`, tagged with a fresh
    /// operation ID, before returning.
    #[instrument(skip(self, shoot), fields(shoot = %shoot.key()))]
    pub async fn maintain(&self, shoot: &Shoot) -> Result<()> {
        let op_id = operation_id()?;
        info!(operation = %op_id, "Maintaining shoot");

        let profile = match self.cloud_profile(shoot).await {
            Ok(profile) => profile,
            Err(e) => {
                return Err(self
                    .fail(shoot, &op_id, "Could not load the CloudProfile", e)
                    .await)
            }
        };

        let plan = match plan(shoot, &profile) {
            Ok(plan) => plan,
            Err(e) => {
                return Err(self
                    .fail(
                        shoot,
                        &op_id,
                        "Failure while determining the latest Kubernetes patch version in the CloudProfile",
                        e,
                    )
                    .await)
            }
        };

        let original = shoot.spec.maintenance.as_ref().and_then(|m| m.auto_update.clone());
        let result = try_update_shoot(
            self.shoots.as_ref(),
            &self.retry,
            &shoot.namespace().unwrap_or_default(),
            &shoot.name_any(),
            |fresh| {
                let current = fresh.spec.maintenance.as_ref().and_then(|m| m.auto_update.clone());
                if current != original {
                    return Err(Error::invariant(
                        fresh.key(),
                        format!("auto update section of Shoot {} changed mid-air", fresh.key()),
                    ));
                }
                apply(fresh, &plan);
                Ok(())
            },
        )
        .await;

        if let Err(e) = result {
            return Err(self
                .fail(shoot, &op_id, "Could not update the Shoot specification", e)
                .await);
        }

        info!(
            operation = %op_id,
            machine_image = ?plan.machine_image,
            kubernetes_version = ?plan.kubernetes_version,
            "{}", SUCCESS_MESSAGE
        );
        self.events
            .publish(
                &shoot.object_ref(&()),
                EventType::Normal,
                reasons::MAINTENANCE_DONE,
                actions::MAINTAIN,
                Some(operation_note(&op_id, SUCCESS_MESSAGE)),
            )
            .await;
        Ok(())
    }

    async fn cloud_profile(&self, shoot: &Shoot) -> Result<CloudProfile> {
        let name = &shoot.spec.cloud.profile;
        self.shoots
            .get_cloud_profile(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("cloudprofile {}", name)))
    }

    async fn fail(&self, shoot: &Shoot, op_id: &str, context: &str, err: Error) -> Error {
        let message = format!("{}: {}", context, err);
        error!(operation = %op_id, error = %err, "{}", context);
        self.events
            .publish(
                &shoot.object_ref(&()),
                EventType::Warning,
                reasons::MAINTENANCE_ERROR,
                actions::MAINTAIN,
                Some(operation_note(op_id, message)),
            )
            .await;
        err
    }
}

/// Compute the staged updates for `shoot` from `profile`
pub fn plan(shoot: &Shoot, profile: &CloudProfile) -> Result<MaintenancePlan> {
    let machine_image = determine_machine_image(&profile.spec, shoot.spec.cloud.machine_image.as_ref());

    let kubernetes_version = if shoot.auto_update().kubernetes_version {
        determine_latest_patch_version(
            &profile.spec.kubernetes.versions,
            &shoot.spec.kubernetes.version,
        )?
    } else {
        None
    };

    Ok(MaintenancePlan {
        machine_image,
        kubernetes_version,
    })
}

/// Write `plan` and the reconcile request into `shoot`
fn apply(shoot: &mut Shoot, plan: &MaintenancePlan) {
    let annotations = shoot.annotations_mut();
    annotations.remove(SHOOT_OPERATION_ANNOTATION);
    add_tasks(
        annotations,
        &[
            SHOOT_TASK_DEPLOY_INFRASTRUCTURE,
            SHOOT_TASK_DEPLOY_KUBE2IAM_RESOURCE,
        ],
    );
    annotations.insert(
        SHOOT_OPERATION_ANNOTATION.to_string(),
        SHOOT_OPERATION_RECONCILE.to_string(),
    );

    if let Some(image) = &plan.machine_image {
        shoot.spec.cloud.machine_image = Some(image.clone());
    }
    if let Some(version) = &plan.kubernetes_version {
        shoot.spec.kubernetes.version = version.clone();
    }
}

/// Append `tasks` to the comma-separated tasks annotation, skipping duplicates
fn add_tasks(annotations: &mut BTreeMap<String, String>, tasks: &[&str]) {
    let mut current: Vec<String> = annotations
        .get(SHOOT_TASKS_ANNOTATION)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    for task in tasks {
        if !current.iter().any(|t| t == task) {
            current.push(task.to_string());
        }
    }
    annotations.insert(SHOOT_TASKS_ANNOTATION.to_string(), current.join(","));
}
