//! AE4DMA channel: PCI BAR attach, 16 hardware queues, and the
//! submit-copy/flush/process-events contract (spec §4.C).

use crate::core::dma::{Iovec, IovIter, PhysAddrTranslator};

use super::{
    error::Ae4dmaError,
    queue::CmdQueue,
};

pub const MAX_HW_QUEUES: usize = 16;

/// A single attached AE4DMA engine. `translator` stands in for
/// `spdk_vtophys`, an external concern this crate only consumes through a
/// trait object (spec §1).
pub struct Ae4dmaChannel<T: PhysAddrTranslator> {
    queues: Vec<CmdQueue>,
    translator: T,
    max_xfer_size: u64,
}

impl<T: PhysAddrTranslator> Ae4dmaChannel<T> {
    /// Simulates `spdk_pci_device_map_bar` + queue bring-up: write
    /// `q_per_eng` to the common-config offset, then for each queue
    /// allocate its descriptor ring, program `qbase_lo/hi` and `max_idx`,
    /// enable the queue, mask its interrupt, and read back `write_idx`/
    /// `read_idx` to initialize the host mirrors (spec §4.C "PCI attach").
    pub fn attach(translator: T, queue_count: usize) -> Self {
        let q_per_eng = queue_count.min(MAX_HW_QUEUES).max(1);
        let queues = (0 .. q_per_eng).map(|_| CmdQueue::new()).collect();
        Self {
            queues,
            translator,
            max_xfer_size: 1u64 << 32,
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    fn queue_mut(&mut self, hwq_id: usize) -> Result<&mut CmdQueue, Ae4dmaError> {
        let count = self.queues.len();
        self.queues
            .get_mut(hwq_id)
            .ok_or(Ae4dmaError::BadQueue {
                hwq_id,
                count,
            })
    }

    /// Translate one `(src, dst, len)` triple into a list of
    /// `(src_phys, dst_phys, len)` segments, splitting further wherever
    /// `vtophys` reports a shorter contiguous run than requested.
    fn translate_triple(
        &self,
        mut src_ptr: *mut u8,
        mut dst_ptr: *mut u8,
        mut remain: usize,
    ) -> Result<Vec<(u64, u64, u32)>, Ae4dmaError> {
        let mut segs = Vec::new();
        while remain > 0 {
            let (src_phys, src_run) = self
                .translator
                .vtophys(src_ptr, remain)
                .map_err(|source| Ae4dmaError::Translation {
                    source,
                })?;
            let (dst_phys, dst_run) = self
                .translator
                .vtophys(dst_ptr, remain)
                .map_err(|source| Ae4dmaError::Translation {
                    source,
                })?;
            let seg_len = src_run.min(dst_run).min(remain).min(self.max_xfer_size as usize);
            if seg_len == 0 {
                return Err(crate::core::dma::IovIterError::ZeroLength.into());
            }
            segs.push((src_phys, dst_phys, seg_len as u32));
            src_ptr = unsafe { src_ptr.add(seg_len) };
            dst_ptr = unsafe { dst_ptr.add(seg_len) };
            remain -= seg_len;
        }
        Ok(segs)
    }

    /// Build descriptors for a copy from `src` to `dst`, splitting at iovec
    /// boundaries and further at whatever contiguous physical run
    /// `vtophys` reports (spec §4.C "Submit-copy operation"). Does not
    /// touch the doorbell; call [`Ae4dmaChannel::flush`] to submit. The
    /// completion callback fires once, attached to the final descriptor of
    /// the batch.
    pub fn build_copy(
        &mut self,
        hwq_id: usize,
        dst: &[Iovec],
        src: &[Iovec],
        cb: impl FnOnce(i32) + Send + 'static,
    ) -> Result<(), Ae4dmaError> {
        let triples: Vec<_> = IovIter::new(src, dst)?.collect();
        let mut segments = Vec::new();
        for triple in triples {
            segments.extend(self.translate_triple(triple.src, triple.dst, triple.len)?);
        }

        let queue = self.queue_mut(hwq_id)?;
        let last = segments.len().saturating_sub(1);
        let mut cb = Some(cb);
        for (i, (src_phys, dst_phys, len)) in segments.iter().enumerate() {
            if queue.is_full() {
                return Err(Ae4dmaError::RingFull {
                    hwq_id,
                });
            }
            let seg_cb: Option<Box<dyn FnOnce(i32) + Send>> = if i == last {
                cb.take().map(|f| Box::new(f) as Box<dyn FnOnce(i32) + Send>)
            } else {
                None
            };
            queue.push_descriptor(*src_phys, *dst_phys, *len, seg_cb);
        }
        Ok(())
    }

    /// Publish all descriptors built since the last flush to hardware.
    pub fn flush(&mut self, hwq_id: usize) -> Result<(), Ae4dmaError> {
        let queue = self.queue_mut(hwq_id)?;
        queue.flush(|phys| phys as *mut u8);
        Ok(())
    }

    /// Drain completions for one queue; returns events handled.
    pub fn process_events(&mut self, hwq_id: usize) -> Result<usize, Ae4dmaError> {
        Ok(self.queue_mut(hwq_id)?.process_events())
    }

    pub fn ring_buff_count(&self, hwq_id: usize) -> usize {
        self.queues[hwq_id].ring_buff_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dma::IdentityTranslator;
    use std::sync::{Arc, Mutex};

    #[test]
    fn copy_roundtrips_after_flush_and_drain() {
        let mut chan = Ae4dmaChannel::attach(IdentityTranslator, 1);
        let mut src = vec![0xA3u8; 512];
        let mut dst = vec![0u8; 512];
        let done = Arc::new(Mutex::new(false));
        let done2 = done.clone();
        chan.build_copy(
            0,
            &[Iovec::new(dst.as_mut_ptr(), 512)],
            &[Iovec::new(src.as_mut_ptr(), 512)],
            move |status| {
                assert_eq!(status, 0);
                *done2.lock().unwrap() = true;
            },
        )
        .unwrap();
        chan.flush(0).unwrap();
        let handled = chan.process_events(0).unwrap();
        assert_eq!(handled, 1);
        assert!(*done.lock().unwrap());
        assert_eq!(dst, src);
    }

    #[test]
    fn ring_full_at_28_outstanding() {
        let mut chan = Ae4dmaChannel::attach(IdentityTranslator, 1);
        let mut src = vec![0u8; 28];
        let mut dst = vec![0u8; 28];
        for i in 0 .. 28usize {
            let s = unsafe { src.as_mut_ptr().add(i) };
            let d = unsafe { dst.as_mut_ptr().add(i) };
            chan.build_copy(0, &[Iovec::new(d, 1)], &[Iovec::new(s, 1)], |_| {})
                .unwrap();
        }
        let s = src.as_mut_ptr();
        let d = dst.as_mut_ptr();
        let err = chan
            .build_copy(0, &[Iovec::new(d, 1)], &[Iovec::new(s, 1)], |_| {})
            .unwrap_err();
        assert!(matches!(err, Ae4dmaError::RingFull { .. }));
    }

    #[test]
    fn drain_releases_slots_in_tail_to_head_order() {
        let mut chan = Ae4dmaChannel::attach(IdentityTranslator, 1);
        let mut src = vec![0u8; 28];
        let mut dst = vec![0u8; 28];
        for i in 0 .. 28usize {
            let s = unsafe { src.as_mut_ptr().add(i) };
            let d = unsafe { dst.as_mut_ptr().add(i) };
            chan.build_copy(0, &[Iovec::new(d, 1)], &[Iovec::new(s, 1)], |_| {})
                .unwrap();
        }
        chan.flush(0).unwrap();
        let handled = chan.process_events(0).unwrap();
        assert_eq!(handled, 28);
        assert_eq!(chan.ring_buff_count(0), 0);
        // slots are free again
        let s = src.as_mut_ptr();
        let d = dst.as_mut_ptr();
        chan.build_copy(0, &[Iovec::new(d, 1)], &[Iovec::new(s, 1)], |_| {})
            .unwrap();
    }
}
