//! Target-wide options and the NQN-keyed subsystem table (spec §4.H).
//! Clamps on `NvmfTgtOpts` mirror the teacher's `NvmfTcpTransportOpts`
//! (`subsys/config/opts.rs`) and must be preserved exactly.

use serde::{Deserialize, Serialize};

use super::{error::NvmfError, subsystem::{Subsystem, SubsystemTable}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NvmfTgtOpts {
    pub max_queue_depth: u16,
    pub max_queues_per_session: u16,
    pub in_capsule_data_size: u32,
    pub max_io_size: u32,
}

impl Default for NvmfTgtOpts {
    fn default() -> Self {
        Self {
            max_queue_depth: 128,
            max_queues_per_session: 4,
            in_capsule_data_size: 4096,
            max_io_size: 131_072,
        }
    }
}

impl NvmfTgtOpts {
    /// Validate against the spec's clamps (§4.H); nothing here silently
    /// coerces an out-of-range value, unlike the defaults above.
    pub fn validate(&self) -> Result<(), NvmfError> {
        check_range("max_queue_depth", self.max_queue_depth as u32, 16, 1024)?;
        check_range("max_queues_per_session", self.max_queues_per_session as u32, 2, 1024)?;
        check_range("in_capsule_data_size", self.in_capsule_data_size, 4096, 131_072)?;
        check_multiple("in_capsule_data_size", self.in_capsule_data_size, 16)?;
        check_range("max_io_size", self.max_io_size, 4096, 131_072)?;
        check_multiple("max_io_size", self.max_io_size, 4096)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), NvmfError> {
    if value < min || value > max {
        return Err(NvmfError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

fn check_multiple(field: &'static str, value: u32, multiple: u32) -> Result<(), NvmfError> {
    if value % multiple != 0 {
        return Err(NvmfError::NotAMultiple {
            field,
            multiple,
            value,
        });
    }
    Ok(())
}

/// The NVMf target: options plus the NQN-keyed subsystem table, with the
/// discovery subsystem reserved at construction (spec §4.H).
pub struct Target {
    pub opts: NvmfTgtOpts,
    pub subsystems: SubsystemTable,
}

/// Process-wide target instance the RPC dispatch table (spec §4.I,
/// methods `*_nvmf_subsystem*`) operates on, mirroring the bdev
/// registry's `global()` singleton.
pub fn global() -> &'static parking_lot::Mutex<Target> {
    static TARGET: once_cell::sync::OnceCell<parking_lot::Mutex<Target>> = once_cell::sync::OnceCell::new();
    TARGET.get_or_init(|| parking_lot::Mutex::new(Target::new(NvmfTgtOpts::default()).expect("default opts always validate")))
}

impl Target {
    pub fn new(opts: NvmfTgtOpts) -> Result<Self, NvmfError> {
        opts.validate()?;
        let mut subsystems = SubsystemTable::new();
        subsystems.register(Subsystem::discovery(0)).expect("discovery nqn is reserved and unique");
        Ok(Self {
            opts,
            subsystems,
        })
    }

    /// NUMA advisory (spec §4.H): compares a device/listener's NUMA node
    /// to the subsystem's owning core's socket and logs a warning on
    /// mismatch. Never fails — this is advisory only, not an error.
    pub fn check_numa_affinity(&self, nqn: &str, device_numa_node: u32, core_socket: u32) {
        if device_numa_node != core_socket {
            log::warn!(
                "nvmf subsystem {} on core socket {} attached a resource on NUMA node {} (cross-NUMA access)",
                nqn,
                core_socket,
                device_numa_node
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvmf::subsystem::{Mode, SubType};

    #[test]
    fn defaults_pass_validation() {
        NvmfTgtOpts::default().validate().unwrap();
    }

    #[test]
    fn queue_depth_below_minimum_rejected() {
        let opts = NvmfTgtOpts {
            max_queue_depth: 8,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(NvmfError::OutOfRange { .. })));
    }

    #[test]
    fn in_capsule_data_size_non_multiple_of_16_rejected() {
        let opts = NvmfTgtOpts {
            in_capsule_data_size: 4100,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(NvmfError::NotAMultiple { .. })));
    }

    #[test]
    fn max_io_size_non_multiple_of_4096_rejected() {
        let opts = NvmfTgtOpts {
            max_io_size: 5000,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(NvmfError::NotAMultiple { .. })));
    }

    #[test]
    fn new_target_reserves_discovery_subsystem() {
        let target = Target::new(NvmfTgtOpts::default()).unwrap();
        assert!(target.subsystems.get(super::super::subsystem::SPDK_NVMF_DISCOVERY_NQN).is_some());
    }

    #[test]
    fn new_target_rejects_invalid_opts() {
        let opts = NvmfTgtOpts {
            max_queues_per_session: 0,
            ..Default::default()
        };
        assert!(Target::new(opts).is_err());
    }

    #[test]
    fn register_additional_subsystem() {
        let mut target = Target::new(NvmfTgtOpts::default()).unwrap();
        target
            .subsystems
            .register(Subsystem::new("nqn.test", SubType::Nvme, Mode::Virtual, 0))
            .unwrap();
        assert_eq!(target.subsystems.nqns().len(), 2);
    }
}
