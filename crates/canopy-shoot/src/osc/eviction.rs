//! Kubelet memory eviction thresholds per machine type

use canopy_common::crd::MachineType;
use canopy_common::kube_utils::parse_memory_quantity;
use canopy_common::Result;

const LARGE_MACHINE_MEMORY: u64 = 8 << 30;

/// Hard and soft `memory.available` eviction thresholds for a worker.
///
/// Machines with more than 8Gi keep an absolute reserve, smaller ones a
/// share of their memory. A machine type missing from the profile gets a
/// small fixed reserve.
pub fn eviction_memory_available(
    machine_types: &[MachineType],
    machine_type: &str,
) -> Result<(&'static str, &'static str)> {
    let Some(found) = machine_types.iter().find(|t| t.name == machine_type) else {
        return Ok(("100Mi", "200Mi"));
    };
    if parse_memory_quantity(&found.memory)? > LARGE_MACHINE_MEMORY {
        Ok(("1Gi", "1.5Gi"))
    } else {
        Ok(("5%", "10%"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str, memory: &str) -> MachineType {
        MachineType {
            name: name.to_string(),
            cpu: "2".to_string(),
            memory: memory.to_string(),
            usable: true,
        }
    }

    #[test]
    fn thresholds_follow_machine_memory() {
        let types = vec![machine("m5.xlarge", "16Gi"), machine("t3.small", "2Gi")];

        assert_eq!(eviction_memory_available(&types, "m5.xlarge").unwrap(), ("1Gi", "1.5Gi"));
        assert_eq!(eviction_memory_available(&types, "t3.small").unwrap(), ("5%", "10%"));
        assert_eq!(eviction_memory_available(&types, "x1.huge").unwrap(), ("100Mi", "200Mi"));
    }

    #[test]
    fn exactly_eight_gibibytes_counts_as_small() {
        let types = vec![machine("m5.large", "8Gi")];
        assert_eq!(eviction_memory_available(&types, "m5.large").unwrap(), ("5%", "10%"));
    }

    #[test]
    fn unparseable_memory_is_an_error() {
        let types = vec![machine("weird", "lots")];
        assert!(eviction_memory_available(&types, "weird").is_err());
    }
}
