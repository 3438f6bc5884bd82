//! Command line and environment configuration

use std::path::PathBuf;

use clap::Parser;

use canopy_common::retry::RetryConfig;
use canopy_common::telemetry::TelemetryConfig;
use canopy_shoot::maintenance::controller::DEFAULT_CONTROLLER_NAME;
use canopy_shoot::maintenance::MaintenanceConfig;

/// Canopy - automated maintenance of Shoot clusters
#[derive(Parser, Debug)]
#[command(name = "canopy-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Kubeconfig of the garden cluster; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Name reported as the source of Kubernetes events
    #[arg(long, env = "CANOPY_CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Honour the shoot ignore annotation
    #[arg(long, env = "CANOPY_RESPECT_SYNC_PERIOD_OVERWRITE")]
    pub respect_sync_period_overwrite: bool,

    /// Attempts for a Shoot write that keeps conflicting
    #[arg(long, env = "CANOPY_CONFLICT_RETRY_ATTEMPTS", default_value_t = 5)]
    pub conflict_retry_attempts: u32,

    /// Service name attached to exported traces
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "canopy-operator")]
    pub service_name: String,
}

impl Cli {
    /// Settings for the maintenance controller
    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            respect_sync_period_overwrite: self.respect_sync_period_overwrite,
            retry: RetryConfig {
                max_attempts: self.conflict_retry_attempts,
                ..RetryConfig::conflicts()
            },
            controller_name: self.controller_name.clone(),
        }
    }

    /// Settings for logging and trace export
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.service_name.clone(),
            ..TelemetryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library_defaults() {
        let cli = Cli::try_parse_from(["canopy-operator"]).unwrap();
        let config = cli.maintenance_config();
        let defaults = MaintenanceConfig::default();

        assert!(!cli.crd);
        assert_eq!(config.controller_name, defaults.controller_name);
        assert_eq!(config.respect_sync_period_overwrite, defaults.respect_sync_period_overwrite);
        assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);
        assert_eq!(cli.telemetry_config().service_name, "canopy-operator");
    }

    #[test]
    fn flags_override_maintenance_settings() {
        let cli = Cli::try_parse_from([
            "canopy-operator",
            "--respect-sync-period-overwrite",
            "--conflict-retry-attempts",
            "9",
            "--controller-name",
            "maintenance-eu1",
        ])
        .unwrap();
        let config = cli.maintenance_config();

        assert!(config.respect_sync_period_overwrite);
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.controller_name, "maintenance-eu1");
    }
}
