//! Version lookups against a CloudProfile
//!
//! Versions are compared with semantic-version ordering. The candidate list
//! is unordered; results do not depend on its order.

use semver::Version;

use canopy_common::crd::{CloudProfileSpec, MachineImage};
use canopy_common::{Error, Result};

/// Parse a Kubernetes version, tolerating a leading `v`
pub fn parse_version(value: &str) -> Result<Version> {
    let trimmed = value.strip_prefix('v').unwrap_or(value);
    Version::parse(trimmed)
        .map_err(|e| Error::validation(format!("invalid version {:?}: {}", value, e)))
}

fn parse_all(versions: &[String]) -> Result<Vec<(Version, &str)>> {
    versions
        .iter()
        .map(|v| parse_version(v).map(|parsed| (parsed, v.as_str())))
        .collect()
}

/// Latest patch release of `current`'s minor line, if newer than `current`
pub fn determine_latest_patch_version(versions: &[String], current: &str) -> Result<Option<String>> {
    let current = parse_version(current)?;
    Ok(parse_all(versions)?
        .into_iter()
        .filter(|(v, _)| v.major == current.major && v.minor == current.minor && *v > current)
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string()))
}

/// Latest patch release of the lowest minor line above `current`'s
pub fn determine_next_minor_version(versions: &[String], current: &str) -> Result<Option<String>> {
    let current = parse_version(current)?;
    let candidates: Vec<_> = parse_all(versions)?
        .into_iter()
        .filter(|(v, _)| v.major == current.major && v.minor > current.minor)
        .collect();

    let Some(next_minor) = candidates.iter().map(|(v, _)| v.minor).min() else {
        return Ok(None);
    };
    Ok(candidates
        .into_iter()
        .filter(|(v, _)| v.minor == next_minor)
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string()))
}

/// The profile's image for `current`'s name, when it differs from `current`
pub fn determine_machine_image(
    profile: &CloudProfileSpec,
    current: Option<&MachineImage>,
) -> Option<MachineImage> {
    let current = current?;
    profile
        .machine_images
        .iter()
        .find(|image| image.name == current.name)
        .filter(|image| image.version != current.version)
        .cloned()
}
