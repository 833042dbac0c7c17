//! Subsystem bring-up/teardown ordering and the in-process configuration
//! surface (component J). Grounded on the teacher's `subsys::registration`
//! and `subsys::config` modules, reworked away from the SPDK
//! `spdk_subsystem`/`spdk_add_subsystem` FFI pair into a plain Rust trait
//! object registry, since there is no SPDK application runtime here to
//! register against.

pub mod config;
pub mod init;

pub use config::{BdevOpts, Config};
pub use init::{Subsystem, SubsystemRegistry};
