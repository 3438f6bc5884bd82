//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, bounded polling, label-safe hashing and the small
//! amount of quantity/CIDR arithmetic the shoot controllers need.

use std::future::Future;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use ipnet::IpNet;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Error;

/// Maximum length of a Kubernetes label value
pub const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll until a condition is met, the timeout is reached, or `cancel` fires
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)`. Retryable errors
/// from the check are treated as "not yet" and the last one is included in
/// the timeout error; any other error aborts the wait.
///
/// # Arguments
/// * `timeout` - Maximum time to wait for the condition
/// * `poll_interval` - Time between polling attempts
/// * `operation` - Name used in the timeout/cancellation error
/// * `cancel` - Token aborting the wait early
/// * `check_fn` - Async function that returns `Ok(true)` when condition is met
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    operation: impl Into<String>,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let operation = operation.into();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!(%operation, "Polling condition not yet met, retrying...");
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                trace!(%operation, error = %e, "Polling check returned error (retrying)");
                last_error = Some(e.to_string());
            }
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            let message = match last_error {
                Some(e) => format!("condition not met within {:?}: {}", timeout, e),
                None => format!("condition not met within {:?}", timeout),
            };
            return Err(Error::timeout(operation, message));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Hex-encoded SHA-256 of `input`
pub fn sha256_hex(input: &[u8]) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input);
    hash.as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Cut a value down to the label-value length limit.
///
/// Deterministic prefix truncation; two inputs sharing their first 63
/// characters collide, which is acceptable for hex digests.
pub fn truncate_label_value(value: &str) -> &str {
    match value.char_indices().nth(MAX_LABEL_VALUE_LENGTH) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Parse a Kubernetes memory quantity (`16Gi`, `1.5Gi`, `512M`, `1024`) into bytes
pub fn parse_memory_quantity(quantity: &str) -> Result<u64, Error> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let multiplier: u64 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        other => {
            return Err(Error::validation(format!(
                "invalid memory quantity {:?}: unknown suffix {:?}",
                quantity, other
            )))
        }
    };

    let value: f64 = number.parse().map_err(|_| {
        Error::validation(format!("invalid memory quantity {:?}", quantity))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::validation(format!(
            "invalid memory quantity {:?}",
            quantity
        )));
    }

    Ok((value * multiplier as f64).round() as u64)
}

/// Return the `n`th address of a CIDR block (`n = 1` is the first host)
///
/// Errors if the CIDR is malformed or the block is too small.
pub fn nth_ip_in_cidr(cidr: &str, n: u32) -> Result<IpAddr, Error> {
    let net: IpNet = cidr
        .parse()
        .map_err(|e| Error::validation(format!("invalid CIDR {:?}: {}", cidr, e)))?;
    let addr = match net.network() {
        IpAddr::V4(base) => u32::from(base).checked_add(n).map(|a| IpAddr::V4(a.into())),
        IpAddr::V6(base) => u128::from(base)
            .checked_add(u128::from(n))
            .map(|a| IpAddr::V6(a.into())),
    };
    addr.filter(|addr| net.contains(addr)).ok_or_else(|| {
        Error::validation(format!("CIDR {} has no address at offset {}", cidr, n))
    })
}
