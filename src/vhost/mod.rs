//! Shared-memory virtqueue consumer for the vhost-user SCSI controller
//! (spec §3 "Vhost SCSI Device", §4.G). The vhost-user protocol handshake
//! itself (the `new_device`/`destroy_device` callbacks from the control
//! channel) is an external DPDK-equivalent concern (spec §1); this module
//! owns what happens once a device is attached: ring bookkeeping,
//! GPA→VVA translation, and dispatching parsed requests to a LUN.

pub mod device;
pub mod mem_table;
pub mod request;
pub mod virtqueue;

pub use device::{VhostScsiDevice, VhostScsiError};
pub use mem_table::{MemRegion, MemTable};
pub use virtqueue::Virtqueue;
