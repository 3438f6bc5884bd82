//! Automated Shoot maintenance
//!
//! A Shoot is maintained once per daily window instance, or immediately
//! when it carries the maintain-now operation annotation.

pub mod control;
pub mod controller;
pub mod scheduler;
pub mod versions;
pub mod window;

pub use control::{plan, MaintenanceControl, MaintenancePlan};
pub use controller::{error_policy, reconcile, Context, ContextBuilder, MaintenanceConfig};
pub use scheduler::{
    effective_window, should_enqueue_on_update, should_maintain_now, MaintenanceSchedule, Trigger,
};
pub use versions::{determine_latest_patch_version, determine_machine_image, determine_next_minor_version};
pub use window::{next_window, MaintenanceWindow};
