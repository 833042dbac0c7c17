//! OCSSD/FTL bdev backend. NVMe command decoding and the real
//! open-channel geometry/chunk-state machinery live outside this crate's
//! scope (spec §1); this backend honors the `construct_ocssd_bdev` /
//! `delete_ocssd_bdev` contract (spec §6) over a flat in-memory store so
//! the rest of the stack (split, delay, RPC dispatch) can stack on an
//! OCSSD-named bdev without depending on real hardware.

use crate::bdev::{backends::malloc::MallocBdev, BdevIo, BdevOps, IoType, SubmitError};

pub struct OcssdBdev {
    /// Stands in for real chunk/FTL state; OCSSD geometry translation is
    /// not reimplemented here.
    backing: MallocBdev,
}

impl OcssdBdev {
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            backing: MallocBdev::new(block_size, block_count),
        }
    }
}

impl BdevOps for OcssdBdev {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        self.backing.submit_request(io)
    }

    fn io_type_supported(&self, io_type: IoType) -> bool {
        self.backing.io_type_supported(io_type)
    }
}

/// `construct_ocssd_bdev` (spec §6).
pub fn construct_ocssd_bdev(
    name: impl Into<String>,
    block_size: u32,
    block_count: u64,
) -> Result<std::sync::Arc<crate::bdev::Bdev>, crate::bdev::BdevError> {
    let bdev = crate::bdev::Bdev::new(name, "ocssd", block_size, block_count, Box::new(OcssdBdev::new(block_size, block_count)));
    crate::bdev::registry::global().lock().register(bdev)
}

/// `delete_ocssd_bdev` (spec §6).
pub fn delete_ocssd_bdev(name: &str) -> Result<(), crate::bdev::BdevError> {
    crate::bdev::registry::global().lock().unregister(name)
}
