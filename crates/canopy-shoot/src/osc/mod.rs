//! Worker operating system configuration
//!
//! Generates the downloader and original cloud-configs of every worker
//! pool, issues the bootstrap token joining nodes authenticate with, and
//! renders the manifests executing the cloud-configs on the nodes.

mod bootstrap_token;
mod eviction;
mod execution;
mod pipeline;
mod values;

pub use bootstrap_token::{
    bootstrap_token_id, bootstrap_token_secret_name, compute_bootstrap_token, BootstrapToken,
    BOOTSTRAP_TOKEN_SECRET_TYPE, BOOTSTRAP_TOKEN_VALIDITY_HOURS,
};
pub use eviction::eviction_memory_available;
pub use execution::{
    render_cloud_config_execution, CLOUD_CONFIG_EXECUTION_CHART, CLOUD_CONFIG_EXECUTION_RELEASE,
};
pub use pipeline::{
    CloudConfig, CloudConfigData, CloudConfigMap, PollConfig, WorkerOSConfigPipeline,
    CLOUD_CONFIG_DATA_KEY, OSC_CHART_PATH,
};
pub use values::{
    cloud_config_secret_name, downloader_values, original_values, worker_downloader_values,
    worker_original_values, CLOUD_CONFIG_FILE_PATH,
};
