//! Shoot maintenance controller
//!
//! Reconciles every Shoot on a daily schedule: inside its maintenance window
//! (or on an explicit maintain-now request) a [`MaintenanceControl`] pass
//! runs, and the Shoot is requeued for a random instant inside its next
//! window. See [`MaintenanceSchedule`] for how watch events are filtered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use canopy_common::crd::Shoot;
use canopy_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use canopy_common::retry::RetryConfig;
use canopy_common::{Error, Result};

use super::control::MaintenanceControl;
use super::scheduler::{
    effective_window, requeue_after, should_maintain_now, MaintenanceSchedule, Trigger,
};
use super::window::MaintenanceWindow;
use crate::client::{ShootClient, ShootClientImpl};

/// Default controller name reported on events
pub const DEFAULT_CONTROLLER_NAME: &str = "canopy-shoot-maintenance";

/// Maintenance controller settings
#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
    /// Honour the Shoot ignore annotation
    pub respect_sync_period_overwrite: bool,
    /// Retry policy for conflicting Shoot writes
    pub retry: RetryConfig,
    /// Name reported as the source of events
    pub controller_name: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            respect_sync_period_overwrite: false,
            retry: RetryConfig::conflicts(),
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
        }
    }
}

/// Shared context for the maintenance controller
pub struct Context {
    /// Garden client for Shoots and CloudProfiles
    pub shoots: Arc<dyn ShootClient>,
    /// Runs the maintenance passes
    pub control: MaintenanceControl,
    /// Reports problems the Shoot owner must fix
    pub events: Arc<dyn EventPublisher>,
    /// Pending trigger per Shoot
    pub schedule: MaintenanceSchedule,
    /// Controller settings
    pub config: MaintenanceConfig,
    /// Clock
    pub now: fn() -> DateTime<Utc>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        shoots: Arc<dyn ShootClient>,
        events: Arc<dyn EventPublisher>,
        config: MaintenanceConfig,
        now: fn() -> DateTime<Utc>,
    ) -> Self {
        Self {
            control: MaintenanceControl::new(shoots.clone(), events.clone(), config.retry.clone()),
            events,
            shoots,
            schedule: MaintenanceSchedule::new(),
            config,
            now,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    shoots: Option<Arc<dyn ShootClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: MaintenanceConfig,
    now: fn() -> DateTime<Utc>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            shoots: None,
            events: None,
            config: MaintenanceConfig::default(),
            now: Utc::now,
        }
    }

    /// Override the Shoot client (primarily for testing)
    pub fn shoot_client(mut self, shoots: Arc<dyn ShootClient>) -> Self {
        self.shoots = Some(shoots);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set controller settings
    pub fn config(mut self, config: MaintenanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock
    pub fn clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let shoots = self
            .shoots
            .unwrap_or_else(|| Arc::new(ShootClientImpl::new(self.client.clone())));
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(
                self.client.clone(),
                &self.config.controller_name,
            ))
        });
        Context {
            control: MaintenanceControl::new(shoots.clone(), events.clone(), self.config.retry.clone()),
            events,
            shoots,
            schedule: MaintenanceSchedule::new(),
            config: self.config,
            now: self.now,
        }
    }
}

/// Reconcile a Shoot for maintenance
///
/// A failed pass is reported through events by [`MaintenanceControl`] and
/// does not fail the reconcile: the Shoot is requeued for its next window
/// either way. Only reading the Shoot itself can fail.
#[instrument(skip(shoot, ctx), fields(shoot = %shoot.key()))]
pub async fn reconcile(shoot: Arc<Shoot>, ctx: Arc<Context>) -> Result<Action> {
    let key = shoot.key();
    let now = (ctx.now)();

    if shoot.is_being_deleted() {
        debug!("Skipping because Shoot is marked as to be deleted");
        ctx.schedule.forget(&key);
        return Ok(Action::await_change());
    }

    if let Trigger::Wait(next) = ctx.schedule.observe(&shoot, now) {
        return Ok(Action::requeue(requeue_after(next, now)));
    }

    let namespace = shoot.namespace().unwrap_or_default();
    let Some(current) = ctx.shoots.get_shoot(&namespace, &shoot.name_any()).await? else {
        debug!("Skipping because Shoot has been deleted");
        ctx.schedule.forget(&key);
        return Ok(Action::await_change());
    };
    if current.is_being_deleted() {
        debug!("Skipping because Shoot is marked as to be deleted");
        ctx.schedule.forget(&key);
        return Ok(Action::await_change());
    }
    let current = Arc::new(current);

    if let Err(e) = MaintenanceWindow::for_shoot(&current) {
        ctx.events
            .publish(
                &current.object_ref(&()),
                EventType::Warning,
                reasons::INVALID_MAINTENANCE_WINDOW,
                actions::MAINTAIN,
                Some(format!("{}; using the default window", e)),
            )
            .await;
    }

    let ignored = ctx.config.respect_sync_period_overwrite && current.has_ignore_annotation();
    if ignored || !should_maintain_now(&current, now) {
        info!("Skipping because Shoot is either marked as to be ignored or must not be maintained now");
    } else if current.spec.cloud.seed.is_none() {
        debug!("Skipping because Shoot has not been scheduled yet");
    } else if let Err(e) = ctx.control.maintain(&current).await {
        warn!(error = %e, "Maintenance pass failed");
    }

    let window = effective_window(&current);
    let next = window.next_instant_after_current(now, &mut rand::thread_rng());
    let after = requeue_after(next, now);
    info!(next = %next, in_secs = after.as_secs(), "Scheduled maintenance");
    ctx.schedule.schedule(current, next);

    Ok(Action::requeue(after))
}

/// Error policy for the maintenance controller
pub fn error_policy(shoot: Arc<Shoot>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        shoot = %shoot.key(),
        "maintenance reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
