//! Block-device core: a process-wide name-keyed registry, descriptors,
//! per-thread I/O channels, and the I/O type every backend and vbdev
//! operates on (spec §3 "Block Device", §4.D "Bdev Core").
//!
//! There is no class hierarchy here (spec §9): `BdevOps` is the function
//! table every backend and vbdev implements; stacking is delegation, a
//! vbdev holds an `Arc<Bdev>` to its base and calls straight through it.

pub mod backends;
pub mod registry;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use snafu::Snafu;

use crate::core::Iovec;

pub use registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    Read,
    Write,
    WriteZeroes,
    Unmap,
    Flush,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Success,
    Failed,
    NoMem,
}

/// Why a backend declined to accept an I/O at submission time (spec §4.D:
/// 0 accepted, `-ENOMEM` park, other negative fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    NoMem,
    Fatal(i32),
}

impl std::fmt::Debug for BdevIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdevIo")
            .field("io_type", &self.io_type)
            .field("offset_blocks", &self.offset_blocks)
            .field("num_blocks", &self.num_blocks)
            .finish()
    }
}

/// One in-flight request (spec §3 "Bdev I/O"). `Σ iov_len == num_blocks *
/// block_size` is checked once, at [`BdevHandle::submit`], not re-derived
/// by every backend.
pub struct BdevIo {
    pub io_type: IoType,
    pub offset_blocks: u64,
    pub num_blocks: u64,
    pub iovs: Vec<Iovec>,
    completion_cb: Option<Box<dyn FnOnce(IoStatus) + Send>>,
}

// The iovecs point at caller-owned DMA buffers that outlive the I/O; the
// completion callback is already `Send`.
unsafe impl Send for BdevIo {}

impl BdevIo {
    pub fn new(
        io_type: IoType,
        offset_blocks: u64,
        num_blocks: u64,
        iovs: Vec<Iovec>,
        completion_cb: impl FnOnce(IoStatus) + Send + 'static,
    ) -> Self {
        Self {
            io_type,
            offset_blocks,
            num_blocks,
            iovs,
            completion_cb: Some(Box::new(completion_cb)),
        }
    }

    /// Total bytes carried by `iovs`.
    pub fn iov_len(&self) -> usize {
        self.iovs.iter().map(|v| v.len).sum()
    }

    /// Run the completion callback. Backends must call this exactly once
    /// per submitted I/O (spec §7), even on failure.
    pub fn complete(mut self, status: IoStatus) {
        if let Some(cb) = self.completion_cb.take() {
            cb(status);
        }
    }
}

#[derive(Debug, Snafu)]
pub enum BdevError {
    #[snafu(display("bdev {} already exists", name))]
    AlreadyExists { name: String },
    #[snafu(display("bdev {} not found", name))]
    NotFound { name: String },
    #[snafu(display("bdev {} is already claimed by {}", name, owner))]
    AlreadyClaimed { name: String, owner: String },
    #[snafu(display("invalid argument: {}", message))]
    Invalid { message: String },
    #[snafu(display("I/O out of range: offset {} + count {} exceeds {} blocks", offset, count, total))]
    OutOfRange { offset: u64, count: u64, total: u64 },
}

/// The function table every backend and vbdev implements (spec §9
/// "function-table pattern" instead of a class hierarchy).
pub trait BdevOps: Send + Sync {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)>;
    fn io_type_supported(&self, io_type: IoType) -> bool;
}

#[derive(Debug)]
struct ChannelToken {
    bdev_name: String,
    core: u32,
}

impl Drop for ChannelToken {
    fn drop(&mut self) {
        // The owning `Bdev.channels` map holds only a `Weak`; it prunes
        // itself lazily on the next `get_io_channel` for this core.
        log::trace!("io channel for {} on core {} dropped", self.bdev_name, self.core);
    }
}

/// A per-thread, per-bdev handle (spec §3 "I/O Channel"); reference
/// counted, created lazily on first use from a given core.
#[derive(Clone)]
pub struct IoChannel(Arc<ChannelToken>);

impl IoChannel {
    pub fn core(&self) -> u32 {
        self.0.core
    }
}

/// A registered block device: identity, geometry, and the backend it
/// delegates I/O to (spec §3 "Block Device").
pub struct Bdev {
    pub name: String,
    pub product_name: String,
    pub block_size: u32,
    pub block_count: u64,
    pub required_alignment: u8,
    pub optimal_io_boundary: u32,
    ops: Box<dyn BdevOps>,
    claimed_by: Mutex<Option<String>>,
    channels: Mutex<HashMap<u32, Weak<ChannelToken>>>,
    io_wait: Mutex<VecDeque<BdevIo>>,
    remove_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Bdev {
    pub fn new(
        name: impl Into<String>,
        product_name: impl Into<String>,
        block_size: u32,
        block_count: u64,
        ops: Box<dyn BdevOps>,
    ) -> Self {
        Self {
            name: name.into(),
            product_name: product_name.into(),
            block_size,
            block_count,
            required_alignment: 0,
            optimal_io_boundary: 0,
            ops,
            claimed_by: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            io_wait: Mutex::new(VecDeque::new()),
            remove_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn claimed_by(&self) -> Option<String> {
        self.claimed_by.lock().clone()
    }

    fn claim(&self, owner: &str) -> Result<(), BdevError> {
        let mut c = self.claimed_by.lock();
        if let Some(existing) = c.as_ref() {
            return AlreadyClaimed {
                name: self.name.clone(),
                owner: existing.clone(),
            }
            .fail();
        }
        *c = Some(owner.to_string());
        Ok(())
    }

    pub fn unclaim(&self) {
        *self.claimed_by.lock() = None;
    }

    /// Create or reuse this core's channel (spec §3: "created lazily on
    /// first use from a given thread; reference counted").
    pub fn get_io_channel(self: &Arc<Self>, core: u32) -> IoChannel {
        let mut channels = self.channels.lock();
        if let Some(existing) = channels.get(&core).and_then(Weak::upgrade) {
            return IoChannel(existing);
        }
        let token = Arc::new(ChannelToken {
            bdev_name: self.name.clone(),
            core,
        });
        channels.insert(core, Arc::downgrade(&token));
        IoChannel(token)
    }

    /// Validate block bounds, dispatch to the backend, and handle
    /// `-ENOMEM` by parking on the bdev's `io_wait` queue (spec §4.D
    /// "I/O submission").
    pub fn submit(self: &Arc<Self>, _channel: &IoChannel, io: BdevIo) -> Result<(), BdevError> {
        if io.offset_blocks + io.num_blocks > self.block_count {
            let err = OutOfRange {
                offset: io.offset_blocks,
                count: io.num_blocks,
                total: self.block_count,
            }
            .fail();
            io.complete(IoStatus::Failed);
            return err;
        }
        match self.ops.submit_request(io) {
            Ok(()) => Ok(()),
            Err((SubmitError::NoMem, io)) => {
                self.io_wait.lock().push_back(io);
                Ok(())
            }
            Err((SubmitError::Fatal(_), io)) => {
                io.complete(IoStatus::Failed);
                Ok(())
            }
        }
    }

    /// Re-drive everything parked on `io_wait`; a backend calls this once
    /// capacity frees up.
    pub fn retry_io_wait(self: &Arc<Self>) {
        let parked: Vec<_> = {
            let mut q = self.io_wait.lock();
            q.drain(..).collect()
        };
        for io in parked {
            match self.ops.submit_request(io) {
                Ok(()) => {}
                Err((SubmitError::NoMem, io)) => self.io_wait.lock().push_back(io),
                Err((SubmitError::Fatal(_), io)) => io.complete(IoStatus::Failed),
            }
        }
    }

    pub fn io_type_supported(&self, io_type: IoType) -> bool {
        self.ops.io_type_supported(io_type)
    }

    fn on_remove(&self, cb: impl FnOnce() + Send + 'static) {
        self.remove_callbacks.lock().push(Box::new(cb));
    }

    fn fire_remove_callbacks(&self) {
        let cbs: Vec<_> = self.remove_callbacks.lock().drain(..).collect();
        for cb in cbs {
            cb();
        }
    }
}

/// A handle returned by [`Registry::open`] (spec §3 "Bdev Descriptor").
/// Closing (dropping) is always safe; hot-remove invokes `remove_cb`
/// asynchronously rather than invalidating the handle in place.
pub struct Descriptor {
    pub bdev: Arc<Bdev>,
    write: bool,
}

impl Descriptor {
    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn unclaim(&self) {
        if self.write {
            self.bdev.unclaim();
        }
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        self.unclaim();
    }
}

pub(crate) fn open_handle(
    bdev: Arc<Bdev>,
    write: bool,
    claimant: &str,
    remove_cb: Option<Box<dyn FnOnce() + Send>>,
) -> Result<Descriptor, BdevError> {
    if write {
        bdev.claim(claimant)?;
    }
    if let Some(cb) = remove_cb {
        bdev.on_remove(cb);
    }
    Ok(Descriptor {
        bdev,
        write,
    })
}
