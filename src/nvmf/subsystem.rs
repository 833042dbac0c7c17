//! NVMf subsystem data model (spec §3 "NVMf Subsystem", §4.H).

use std::collections::HashMap;

use super::{error::NvmfError, listener::ListenAddr};

/// Reserved NQN for the discovery subsystem, allocated once at startup
/// (spec §4.H).
pub const SPDK_NVMF_DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";

/// Upper bound on virtual namespaces per subsystem (spec §4.H).
pub const MAX_VIRTUAL_NAMESPACE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubType {
    Discovery,
    Nvme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub bdev_name: String,
}

/// Either a direct-mapped controller (Direct mode) or the set of virtual
/// namespaces keyed by nsid (Virtual mode) — mutually exclusive, matching
/// the teacher's `mode`-tagged union rather than two always-present
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    DirectCtrlr(String),
    Namespaces(HashMap<u32, Namespace>),
}

#[derive(Debug, Clone)]
pub struct Subsystem {
    pub nqn: String,
    pub subtype: SubType,
    pub mode: Mode,
    pub owning_core: u32,
    pub listen_addrs: Vec<ListenAddr>,
    pub allowed_hosts: Vec<String>,
    pub allow_any_host: bool,
    pub sn: String,
    pub backing: Backing,
}

impl Subsystem {
    pub fn new(nqn: impl Into<String>, subtype: SubType, mode: Mode, owning_core: u32) -> Self {
        let backing = match mode {
            Mode::Direct => Backing::DirectCtrlr(String::new()),
            Mode::Virtual => Backing::Namespaces(HashMap::new()),
        };
        Self {
            nqn: nqn.into(),
            subtype,
            mode,
            owning_core,
            listen_addrs: Vec::new(),
            allowed_hosts: Vec::new(),
            allow_any_host: false,
            sn: String::new(),
            backing,
        }
    }

    pub fn discovery(owning_core: u32) -> Self {
        let mut s = Self::new(SPDK_NVMF_DISCOVERY_NQN, SubType::Discovery, Mode::Virtual, owning_core);
        s.allow_any_host = true;
        s
    }

    pub fn add_listener(&mut self, addr: ListenAddr) {
        self.listen_addrs.push(addr);
    }

    pub fn add_allowed_host(&mut self, host_nqn: impl Into<String>) {
        self.allowed_hosts.push(host_nqn.into());
    }

    pub fn host_allowed(&self, host_nqn: &str) -> bool {
        self.allow_any_host || self.allowed_hosts.iter().any(|h| h == host_nqn)
    }

    pub fn set_direct_ctrlr(&mut self, ctrlr_name: impl Into<String>) -> Result<(), NvmfError> {
        if self.mode != Mode::Direct {
            return Err(NvmfError::WrongMode {
                nqn: self.nqn.clone(),
            });
        }
        self.backing = Backing::DirectCtrlr(ctrlr_name.into());
        Ok(())
    }

    pub fn add_namespace(&mut self, nsid: u32, bdev_name: impl Into<String>) -> Result<(), NvmfError> {
        match &mut self.backing {
            Backing::Namespaces(ns) => {
                if ns.len() >= MAX_VIRTUAL_NAMESPACE {
                    return Err(NvmfError::NamespaceLimit {
                        nqn: self.nqn.clone(),
                        max: MAX_VIRTUAL_NAMESPACE,
                    });
                }
                ns.insert(
                    nsid,
                    Namespace {
                        bdev_name: bdev_name.into(),
                    },
                );
                Ok(())
            }
            Backing::DirectCtrlr(_) => Err(NvmfError::WrongMode {
                nqn: self.nqn.clone(),
            }),
        }
    }
}

/// Process-wide NQN-keyed registry (spec §4.H, §5 "bdev registry"-style
/// singleton), mutated only by the management reactor in a real
/// deployment.
#[derive(Debug, Default)]
pub struct SubsystemTable {
    subsystems: HashMap<String, Subsystem>,
}

impl SubsystemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subsystem: Subsystem) -> Result<(), NvmfError> {
        if self.subsystems.contains_key(&subsystem.nqn) {
            return Err(NvmfError::AlreadyExists {
                nqn: subsystem.nqn.clone(),
            });
        }
        self.subsystems.insert(subsystem.nqn.clone(), subsystem);
        Ok(())
    }

    pub fn get(&self, nqn: &str) -> Option<&Subsystem> {
        self.subsystems.get(nqn)
    }

    pub fn get_mut(&mut self, nqn: &str) -> Option<&mut Subsystem> {
        self.subsystems.get_mut(nqn)
    }

    pub fn remove(&mut self, nqn: &str) -> Option<Subsystem> {
        self.subsystems.remove(nqn)
    }

    pub fn nqns(&self) -> Vec<String> {
        self.subsystems.keys().cloned().collect()
    }
}
