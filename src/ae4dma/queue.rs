//! A single AE4DMA hardware command queue: the descriptor ring plus the
//! host-side mirror registers (spec §3 "AE4DMA Channel").
//!
//! `ring_buff_count == (write_index - tail) mod 32` is the invariant spec §8
//! calls out; every mutation below maintains it directly rather than
//! recomputing it, so a bug here shows up as a wrong count rather than a
//! silently-false invariant.

use super::descriptor::{DescStatus, HostEntry, HwDescriptor};

pub const DESCRIPTORS_PER_QUEUE: usize = 32;
/// Slots held in reserve so producer and consumer can never collide on the
/// ring (spec §3 invariant).
const RESERVED_SLOTS: usize = 4;

/// Simulated per-queue MMIO register file. In a real deployment these are
/// `volatile` reads/writes against a mapped PCI BAR (spec §6); here they are
/// plain fields so the ring bookkeeping above can be exercised without real
/// hardware. `read_idx` is advanced only by [`CmdQueue::device_execute`],
/// standing in for the hardware consuming what `write_idx` published.
#[derive(Debug, Default)]
pub struct HwqRegs {
    pub control: u32,
    pub status: u32,
    pub max_idx: u32,
    pub read_idx: u32,
    pub write_idx: u32,
    pub intr_status: u32,
    pub qbase_lo: u32,
    pub qbase_hi: u32,
}

pub struct CmdQueue {
    pub regs: HwqRegs,
    /// The DMA-visible descriptor ring (`qbase_addr` in spec terms).
    qbase_addr: Vec<HwDescriptor>,
    /// Host-side callback mirror (`ring` in spec terms).
    ring: Vec<HostEntry>,
    pub write_index: usize,
    pub tail: usize,
    pub ring_buff_count: usize,
}

impl CmdQueue {
    pub fn new() -> Self {
        let mut regs = HwqRegs::default();
        regs.max_idx = DESCRIPTORS_PER_QUEUE as u32;
        regs.control = 1; // AE4DMA_CMD_QUEUE_ENABLE
        Self {
            regs,
            qbase_addr: vec![HwDescriptor::default(); DESCRIPTORS_PER_QUEUE],
            ring: (0 .. DESCRIPTORS_PER_QUEUE).map(|_| HostEntry::default()).collect(),
            write_index: 0,
            tail: 0,
            ring_buff_count: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.ring_buff_count >= DESCRIPTORS_PER_QUEUE - RESERVED_SLOTS
    }

    /// Write one descriptor at the current `write_index`, advance it modulo
    /// the ring size, and bump `ring_buff_count`. Caller must already have
    /// checked `is_full()`.
    pub fn push_descriptor(
        &mut self,
        src_phys: u64,
        dst_phys: u64,
        len: u32,
        cb: Option<Box<dyn FnOnce(i32) + Send>>,
    ) {
        let idx = self.write_index;
        let mut desc = HwDescriptor::default();
        desc.set_status(DescStatus::Submitted);
        desc.length = len;
        desc.set_src(src_phys);
        desc.set_dst(dst_phys);
        self.qbase_addr[idx] = desc;
        self.ring[idx] = HostEntry {
            cb,
        };
        self.ring_buff_count += 1;
        self.write_index = (idx + 1) % DESCRIPTORS_PER_QUEUE;
    }

    /// Publish `write_index` to the (simulated) MMIO doorbell, making every
    /// newly built descriptor visible to hardware at once (spec §4.C
    /// `flush`). Also drives the software hardware model so completion
    /// processing has something to observe.
    pub fn flush(&mut self, translate: impl Fn(u64) -> *mut u8) {
        self.regs.write_idx = self.write_index as u32;
        self.device_execute(translate);
    }

    /// Stand-in for the physical DMA engine: perform the copy for every
    /// descriptor between the hardware's `read_idx` and the published
    /// `write_idx`, then mark them `Completed` and advance `read_idx`. A
    /// real AE4DMA engine does this asynchronously in silicon; this model
    /// keeps the host-side bookkeeping (ring_buff_count/tail, driven only by
    /// [`CmdQueue::process_events`]) decoupled from when the copy actually
    /// happens, so the two invariants in spec §8 stay independently
    /// checkable.
    fn device_execute(&mut self, translate: impl Fn(u64) -> *mut u8) {
        let mut idx = self.regs.read_idx as usize;
        let target = self.regs.write_idx as usize;
        while idx != target {
            let desc = &mut self.qbase_addr[idx];
            if desc.status() == DescStatus::Submitted {
                let src = translate(((desc.src_hi as u64) << 32) | desc.src_lo as u64);
                let dst = translate(((desc.dst_hi as u64) << 32) | desc.dst_lo as u64);
                unsafe {
                    std::ptr::copy_nonoverlapping(src, dst, desc.length as usize);
                }
                desc.set_status(DescStatus::Completed);
            }
            idx = (idx + 1) % DESCRIPTORS_PER_QUEUE;
        }
        self.regs.read_idx = target as u32;
    }

    /// Drain completed (or errored) descriptors starting at `tail`, up to
    /// `ring_buff_count` of them, stopping at the first still-`Submitted`
    /// one. Returns the number of events handled (spec §4.C "Completion
    /// processing").
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        let mut remaining = self.ring_buff_count;
        while remaining > 0 {
            let status = self.qbase_addr[self.tail].status();
            if status == DescStatus::Submitted {
                break;
            }
            let err = if status == DescStatus::Completed {
                0
            } else {
                self.qbase_addr[self.tail].err_code() as i32
            };
            if let Some(cb) = self.ring[self.tail].cb.take() {
                cb(err);
            }
            self.tail = (self.tail + 1) % DESCRIPTORS_PER_QUEUE;
            self.ring_buff_count -= 1;
            handled += 1;
            remaining -= 1;
        }
        handled
    }
}

impl Default for CmdQueue {
    fn default() -> Self {
        Self::new()
    }
}
