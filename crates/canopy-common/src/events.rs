//! Kubernetes Event recording for Canopy controllers.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so the maintenance
//! controller can report outcomes on the Shoot (`kubectl describe shoot`)
//! and tests can capture them.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "MaintenanceDone")
    /// * `action` - What action was taken (e.g. "Maintain")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// A maintenance pass committed its changes
    pub const MAINTENANCE_DONE: &str = "MaintenanceDone";
    /// A maintenance pass failed
    pub const MAINTENANCE_ERROR: &str = "MaintenanceError";
    /// The Shoot's maintenance window cannot be parsed
    pub const INVALID_MAINTENANCE_WINDOW: &str = "InvalidMaintenanceWindow";
}

/// Well-known event action strings.
pub mod actions {
    /// Scheduled or requested maintenance of a Shoot
    pub const MAINTAIN: &str = "Maintain";
}

/// Format an event note tagged with the operation it belongs to.
pub fn operation_note(operation_id: &str, message: impl std::fmt::Display) -> String {
    format!("[{}] {}", operation_id, message)
}
