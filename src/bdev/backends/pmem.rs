//! Persistent-memory bdev backend. A pmem pool is a named, fixed-size
//! byte region (a stand-in for a `libpmemblk` pool file); `bdev_pmem_*`
//! RPC methods create/delete pools and the bdevs backed by them (spec §6).
//!
//! `readv`/`writev` advance `offset_blocks` and decrement the remaining
//! block count per-iov rather than once for the whole request, and assert
//! the remainder reaches zero exactly when the iovecs are exhausted — the
//! legacy asymmetry spec §9's open question calls out is made explicit
//! here instead of implicit in a shared counter.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use snafu::Snafu;

use crate::bdev::{BdevIo, BdevOps, IoStatus, IoType, SubmitError};

#[derive(Debug, Snafu)]
pub enum PmemError {
    #[snafu(display("pmem pool {} already exists", name))]
    PoolExists { name: String },
    #[snafu(display("pmem pool {} not found", name))]
    PoolNotFound { name: String },
}

#[derive(Clone, Copy)]
pub struct PmemPoolInfo {
    pub block_size: u32,
    pub num_blocks: u64,
}

struct Pool {
    info: PmemPoolInfo,
    data: Mutex<Vec<u8>>,
}

#[derive(Default)]
pub struct PmemPools {
    pools: HashMap<String, Pool>,
}

static POOLS: OnceCell<Mutex<PmemPools>> = OnceCell::new();

pub fn pools() -> &'static Mutex<PmemPools> {
    POOLS.get_or_init(|| Mutex::new(PmemPools::default()))
}

impl PmemPools {
    pub fn create_pool(
        &mut self,
        name: &str,
        num_blocks: u64,
        block_size: u32,
    ) -> Result<(), PmemError> {
        if self.pools.contains_key(name) {
            return PoolExists {
                name: name.to_string(),
            }
            .fail();
        }
        self.pools.insert(
            name.to_string(),
            Pool {
                info: PmemPoolInfo {
                    block_size,
                    num_blocks,
                },
                data: Mutex::new(vec![0u8; block_size as usize * num_blocks as usize]),
            },
        );
        Ok(())
    }

    pub fn delete_pool(&mut self, name: &str) -> Result<(), PmemError> {
        self.pools
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PoolNotFound {
                name: name.to_string(),
            }
            .build())
    }

    pub fn get_pool_info(&self, name: &str) -> Result<PmemPoolInfo, PmemError> {
        self.pools
            .get(name)
            .map(|p| p.info)
            .ok_or_else(|| PoolNotFound {
                name: name.to_string(),
            }
            .build())
    }
}

pub struct PmemBdev {
    pool_name: String,
    block_size: u32,
}

impl PmemBdev {
    /// Construct a bdev over an existing pool (`bdev_pmem_create`); fails
    /// if the pool doesn't exist.
    pub fn open(pool_name: &str) -> Result<Self, PmemError> {
        let info = pools().lock().get_pool_info(pool_name)?;
        Ok(Self {
            pool_name: pool_name.to_string(),
            block_size: info.block_size,
        })
    }

    pub fn num_blocks(&self) -> u64 {
        pools().lock().get_pool_info(&self.pool_name).unwrap().num_blocks
    }
}

impl BdevOps for PmemBdev {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        let pools = pools().lock();
        let pool = match pools.pools.get(&self.pool_name) {
            Some(p) => p,
            None => return Err((SubmitError::Fatal(-libc::ENODEV), io)),
        };
        let mut data = pool.data.lock();
        let mut offset_blocks = io.offset_blocks;
        let mut remaining_blocks = io.num_blocks;
        for iov in &io.iovs {
            let iov_blocks = iov.len as u64 / self.block_size as u64;
            let start = offset_blocks as usize * self.block_size as usize;
            match io.io_type {
                IoType::Read => {
                    let src = &data[start .. start + iov.len];
                    let dst = unsafe { std::slice::from_raw_parts_mut(iov.ptr, iov.len) };
                    dst.copy_from_slice(src);
                }
                IoType::Write => {
                    let src = unsafe { std::slice::from_raw_parts(iov.ptr, iov.len) };
                    data[start .. start + iov.len].copy_from_slice(src);
                }
                IoType::WriteZeroes | IoType::Unmap | IoType::Flush | IoType::Reset => {}
            }
            offset_blocks += iov_blocks;
            remaining_blocks -= iov_blocks;
        }
        assert_eq!(remaining_blocks, 0, "pmem iovecs did not cover num_blocks");
        drop(data);
        drop(pools);
        io.complete(IoStatus::Success);
        Ok(())
    }

    fn io_type_supported(&self, _io_type: IoType) -> bool {
        true
    }
}

/// `bdev_pmem_create` (spec §6): register a bdev named `bdev_name` backed
/// by the pool `pool_name`.
pub fn bdev_pmem_create(
    bdev_name: impl Into<String>,
    pool_name: &str,
) -> Result<std::sync::Arc<crate::bdev::Bdev>, crate::bdev::BdevError> {
    let bdev_name = bdev_name.into();
    let pmem = PmemBdev::open(pool_name).map_err(|e| crate::bdev::Invalid { message: e.to_string() }.build())?;
    let block_size = pmem.block_size;
    let num_blocks = pmem.num_blocks();
    let bdev = crate::bdev::Bdev::new(bdev_name, "pmem", block_size, num_blocks, Box::new(pmem));
    crate::bdev::registry::global().lock().register(bdev)
}

/// `bdev_pmem_delete` (spec §6).
pub fn bdev_pmem_delete(bdev_name: &str) -> Result<(), crate::bdev::BdevError> {
    crate::bdev::registry::global().lock().unregister(bdev_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Iovec;

    #[test]
    fn create_pool_then_bdev_roundtrips() {
        let name = "pmem-test-pool-a";
        pools().lock().create_pool(name, 8, 4096).unwrap();
        let bdev = PmemBdev::open(name).unwrap();
        let mut src = vec![0x5Cu8; 4096 * 2];
        bdev.submit_request(BdevIo::new(
            IoType::Write,
            1,
            2,
            vec![Iovec::new(src.as_mut_ptr(), 4096), Iovec::new(unsafe { src.as_mut_ptr().add(4096) }, 4096)],
            |status| assert_eq!(status, IoStatus::Success),
        ))
        .unwrap();
        let mut dst = vec![0u8; 4096 * 2];
        bdev.submit_request(BdevIo::new(
            IoType::Read,
            1,
            2,
            vec![Iovec::new(dst.as_mut_ptr(), 4096), Iovec::new(unsafe { dst.as_mut_ptr().add(4096) }, 4096)],
            |status| assert_eq!(status, IoStatus::Success),
        ))
        .unwrap();
        assert_eq!(dst, src);
        pools().lock().delete_pool(name).unwrap();
    }

    #[test]
    fn pool_info_reports_geometry() {
        let name = "pmem-test-pool-b";
        pools().lock().create_pool(name, 10, 512).unwrap();
        let info = pools().lock().get_pool_info(name).unwrap();
        assert_eq!(info.num_blocks, 10);
        assert_eq!(info.block_size, 512);
        pools().lock().delete_pool(name).unwrap();
    }
}
