//! Custom Resource Definitions for Canopy
//!
//! Shoots and CloudProfiles live in the garden cluster; OperatingSystemConfigs
//! live in a shoot's seed namespace and are reconciled by OS extensions.

mod cloud_profile;
mod operating_system_config;
mod shoot;

pub use cloud_profile::{CloudProfile, CloudProfileSpec, KubernetesConstraints, MachineType};
pub use operating_system_config::{
    CloudConfigStatus, LastError, LastOperation, LastOperationState, OperatingSystemConfig,
    OperatingSystemConfigSpec, OperatingSystemConfigStatus, SecretReference,
};
pub use shoot::{
    CloudSpec, DnsSpec, KubeletConfig, KubernetesSpec, MachineImage, MaintenanceAutoUpdate,
    MaintenanceSpec, MaintenanceTimeWindow, NetworkingSpec, Shoot, ShootSpec, ShootStatus, Worker,
    DEFAULT_MAINTENANCE_BEGIN, DEFAULT_MAINTENANCE_END, DEFAULT_SERVICE_CIDR,
};
