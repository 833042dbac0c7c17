//! `VhostScsiDevice` (spec §3, §4.G): ties a set of virtqueues and a
//! translation table to up to 8 SCSI LUNs and drives the request/control
//! queue poll loops.

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use snafu::Snafu;

use crate::scsi::{Lun, ManagementFunction, ScsiTask, TaskResponse, TaskStatus};

use super::{
    mem_table::MemTable,
    request::{parse_request, RequestError},
    virtqueue::Virtqueue,
};

pub const MAX_SCSI_DEVS: usize = 8;
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// `VIRTIO_SCSI_S_ABORTED` (spec §4.G): the response code written for a
/// rejected or malformed request/TMF.
pub const VIRTIO_SCSI_S_ABORTED: u8 = 5;
pub const VIRTIO_SCSI_S_OK: u8 = 0;

/// SCSI status byte values carried in `virtio_scsi_cmd_resp.status`.
const SCSI_STATUS_GOOD: u8 = 0x00;
const SCSI_STATUS_CHECK_CONDITION: u8 = 0x02;
const SCSI_STATUS_BUSY: u8 = 0x08;
const SCSI_STATUS_TASK_SET_FULL: u8 = 0x28;
const SCSI_STATUS_TASK_ABORTED: u8 = 0x40;

fn scsi_status_byte(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Good => SCSI_STATUS_GOOD,
        TaskStatus::CheckCondition => SCSI_STATUS_CHECK_CONDITION,
        TaskStatus::Busy => SCSI_STATUS_BUSY,
        TaskStatus::TaskSetFull => SCSI_STATUS_TASK_SET_FULL,
        TaskStatus::Aborted => SCSI_STATUS_TASK_ABORTED,
    }
}

/// Layout of `virtio_scsi_cmd_resp`: `sense_len`(4) + `resid`(4) +
/// `status_qualifier`(2) + `status`(1) + `response`(1) + `sense`(up to 96).
const RESP_SENSE_LEN_OFFSET: usize = 0;
const RESP_RESID_OFFSET: usize = 4;
const RESP_STATUS_OFFSET: usize = 10;
const RESP_RESPONSE_OFFSET: usize = 11;
const RESP_SENSE_OFFSET: usize = 12;

#[derive(Debug, Snafu)]
pub enum VhostScsiError {
    #[snafu(display("scsi_devs slot {} out of range (device has {} slots)", slot, MAX_SCSI_DEVS))]
    SlotOutOfRange { slot: usize },
    #[snafu(display("device {} still has {} outstanding tasks after {:?}", name, task_cnt, STOP_TIMEOUT))]
    TaskCntNonZeroAtStop { name: String, task_cnt: i64 },
}

/// A vhost-user SCSI controller attached to one guest (spec §3). Request
/// queue is `virtqueues[0]`; the control queue is `virtqueues[1]`
/// (`VIRTIO_SCSI_CONTROLQ`), matching the convention the guest driver
/// expects.
pub struct VhostScsiDevice {
    pub name: String,
    pub vid: i32,
    pub owning_core: u32,
    pub num_queues: u32,
    pub negotiated_features: u64,
    pub scsi_devs: [Option<Arc<Lun>>; MAX_SCSI_DEVS],
    pub virtqueues: Mutex<Vec<Virtqueue>>,
    pub mem_table: MemTable,
    task_cnt: AtomicI64,
}

impl VhostScsiDevice {
    pub fn new(
        name: impl Into<String>,
        vid: i32,
        owning_core: u32,
        negotiated_features: u64,
        virtqueues: Vec<Virtqueue>,
        mem_table: MemTable,
    ) -> Self {
        let num_queues = virtqueues.len() as u32;
        Self {
            name: name.into(),
            vid,
            owning_core,
            num_queues,
            negotiated_features,
            scsi_devs: Default::default(),
            virtqueues: Mutex::new(virtqueues),
            mem_table,
            task_cnt: AtomicI64::new(0),
        }
    }

    pub fn task_cnt(&self) -> i64 {
        self.task_cnt.load(Ordering::SeqCst)
    }

    pub fn attach_lun(&mut self, slot: usize, lun: Arc<Lun>) -> Result<(), VhostScsiError> {
        if slot >= MAX_SCSI_DEVS {
            return SlotOutOfRange {
                slot,
            }
            .fail();
        }
        self.scsi_devs[slot] = Some(lun);
        Ok(())
    }

    /// Poll the request virtqueue (index 0): claim up to 32 heads, parse
    /// each chain, and dispatch to LUN 0's queue (spec §4.G "request
    /// queue"). Returns the number of tasks dispatched.
    pub fn poll_request_queue(self: &Arc<Self>) -> usize {
        let heads = self.virtqueues.lock()[0].avail_ring_get(32);
        let mut dispatched = 0;
        for head in heads {
            self.handle_request_head(head);
            dispatched += 1;
        }
        dispatched
    }

    fn handle_request_head(self: &Arc<Self>, head: u16) {
        let lun = match self.scsi_devs[0].clone() {
            Some(l) => l,
            None => {
                self.write_aborted_response(head);
                return;
            }
        };

        let parsed = match parse_request(&self.virtqueues.lock()[0], &self.mem_table, head) {
            Ok(p) => p,
            Err(RequestError::EmptyChain) => return,
            Err(_) => {
                self.write_aborted_response(head);
                return;
            }
        };

        self.task_cnt.fetch_add(1, Ordering::SeqCst);
        let device = self.clone();
        let resp = crate::core::Iovec::new(parsed.resp_ptr, parsed.resp_len);
        let head = parsed.head;
        let task = ScsiTask::new(parsed.cdb, parsed.iovs, move |t| {
            device.complete_request(head, resp.ptr, resp.len, t);
            device.task_cnt.fetch_sub(1, Ordering::SeqCst);
        });
        lun.append_task(task);
        lun.execute_tasks();
    }

    /// Reject a chain that could not be parsed into a request, or that
    /// targets an unattached LUN slot: find the response descriptor by
    /// hand, stamp it `ABORTED`, and publish the head so the guest does
    /// not block on a descriptor that will never complete.
    fn write_aborted_response(&self, head: u16) {
        let mut vqs = self.virtqueues.lock();
        let chain = vqs[0].chain(head);
        let resp_desc = chain.iter().rev().find(|d| d.is_write()).copied();

        let resp_len = match resp_desc {
            Some(desc) => {
                if let Ok(ptr) = self.mem_table.translate(desc.addr, desc.len as u64) {
                    let resp = unsafe { std::slice::from_raw_parts_mut(ptr, desc.len as usize) };
                    if resp.len() > RESP_RESPONSE_OFFSET {
                        resp[RESP_RESPONSE_OFFSET] = VIRTIO_SCSI_S_ABORTED;
                    }
                }
                desc.len
            }
            None => 0,
        };
        vqs[0].used_ring_enqueue(head, resp_len, self.negotiated_features);
    }

    /// Write the completed task's status, sense data, and residual into
    /// the response descriptor and publish the head to the used ring
    /// (spec §4.G step 4), directly from the completion callback.
    fn complete_request(self: &Arc<Self>, head: u16, resp_ptr: *mut u8, resp_len: usize, task: &ScsiTask) {
        if resp_len > 0 {
            let resp = unsafe { std::slice::from_raw_parts_mut(resp_ptr, resp_len) };

            let transfer_len: u64 = task.iovs.iter().map(|iov| iov.len as u64).sum();
            let resid = transfer_len.saturating_sub(task.data_transferred) as u32;
            if resp_len >= RESP_RESID_OFFSET + 4 {
                resp[RESP_RESID_OFFSET .. RESP_RESID_OFFSET + 4].copy_from_slice(&resid.to_le_bytes());
            }

            if resp_len > RESP_STATUS_OFFSET {
                resp[RESP_STATUS_OFFSET] = scsi_status_byte(task.status);
            }
            if resp_len > RESP_RESPONSE_OFFSET {
                resp[RESP_RESPONSE_OFFSET] = VIRTIO_SCSI_S_OK;
            }

            if task.status != TaskStatus::Good && resp_len > RESP_SENSE_OFFSET {
                let sense_room = resp_len - RESP_SENSE_OFFSET;
                let n = task.sense.len().min(sense_room);
                resp[RESP_SENSE_OFFSET .. RESP_SENSE_OFFSET + n].copy_from_slice(&task.sense[.. n]);
                if resp_len >= RESP_SENSE_LEN_OFFSET + 4 {
                    resp[RESP_SENSE_LEN_OFFSET .. RESP_SENSE_LEN_OFFSET + 4]
                        .copy_from_slice(&(n as u32).to_le_bytes());
                }
            }
        }
        self.virtqueues.lock()[0].used_ring_enqueue(head, task.data_transferred as u32, self.negotiated_features);
    }

    /// Control queue poll (`VIRTIO_SCSI_CONTROLQ`, spec §4.G): LUN reset
    /// builds a management task; other TMF subtypes are rejected.
    pub fn poll_control_queue(&self, function: Option<ManagementFunction>, lun_slot: usize) -> TaskResponse {
        let lun = match self.scsi_devs.get(lun_slot).and_then(|l| l.clone()) {
            Some(l) => l,
            None => return TaskResponse::Aborted,
        };
        match function {
            Some(ManagementFunction::LunReset) => {
                let result = std::sync::Arc::new(parking_lot::Mutex::new(TaskResponse::Aborted));
                let result2 = result.clone();
                let task = ScsiTask::management(ManagementFunction::LunReset, move |t| {
                    *result2.lock() = t.response;
                });
                lun.append_task(task);
                lun.execute_tasks();
                let response = *result.lock();
                response
            }
            _ => TaskResponse::Aborted,
        }
    }

    /// Wait up to 1s for `task_cnt` to reach zero before the device is
    /// torn down (spec §4.G, §7 "device removal"); panics past the
    /// timeout, matching the legacy behavior of never leaking in-flight
    /// guest I/O silently.
    pub fn stop(&self) {
        let deadline = Instant::now() + STOP_TIMEOUT;
        while self.task_cnt() > 0 {
            if Instant::now() >= deadline {
                panic!(
                    "vhost device {} still has {} outstanding tasks after {:?}",
                    self.name,
                    self.task_cnt(),
                    STOP_TIMEOUT
                );
            }
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    use crate::{
        bdev::{backends::malloc::MallocBdev, Bdev, BdevOps},
        scsi::{BdevScsiBackend, Lun},
        vhost::{
            mem_table::MemRegion,
            virtqueue::{Desc, VIRTQ_DESC_F_NEXT, VIRTQ_DESC_F_WRITE},
        },
    };

    fn read10_cdb() -> Vec<u8> {
        // opcode, flags, LBA(4, BE), group, length(2, BE), control
        vec![0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0]
    }

    fn make_device_with_one_read(mem_regions: &mut [Vec<u8>; 3]) -> (Arc<VhostScsiDevice>, u16) {
        let cdb = read10_cdb();
        mem_regions[0][18..18 + cdb.len()].copy_from_slice(&cdb);

        let regions = vec![
            MemRegion {
                guest_phys_addr: 0x1000,
                userspace_addr: mem_regions[0].as_mut_ptr(),
                size: mem_regions[0].len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x2000,
                userspace_addr: mem_regions[1].as_mut_ptr(),
                size: mem_regions[1].len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x3000,
                userspace_addr: mem_regions[2].as_mut_ptr(),
                size: mem_regions[2].len() as u64,
            },
        ];
        let mem = MemTable::new(regions);

        let mut vq = Virtqueue::new(8);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 64,
            flags: VIRTQ_DESC_F_NEXT,
            next: 1,
        };
        vq.desc[1] = Desc {
            addr: 0x2000,
            len: 512,
            flags: VIRTQ_DESC_F_NEXT | VIRTQ_DESC_F_WRITE,
            next: 2,
        };
        vq.desc[2] = Desc {
            addr: 0x3000,
            len: 32,
            flags: VIRTQ_DESC_F_WRITE,
            next: 0,
        };
        vq.avail_ring[0] = 0;
        vq.avail_idx = 1;

        let device = Arc::new(VhostScsiDevice::new("vhost0", 1, 0, 0, vec![vq], mem));

        let ops: Box<dyn BdevOps> = Box::new(MallocBdev::new(512, 64));
        let bdev = Arc::new(Bdev::new("malloc0", "malloc", 512, 64, ops));
        let lun = Arc::new(Lun::new("lun0", Box::new(BdevScsiBackend::new(bdev))));

        let mut device = Arc::try_unwrap(device).unwrap_or_else(|_| unreachable!());
        device.attach_lun(0, lun).unwrap();
        (Arc::new(device), 0)
    }

    #[test]
    fn completed_request_publishes_response_and_used_ring_entry() {
        let mut bufs = [vec![0u8; 64], vec![0u8; 512], vec![0u8; 32]];
        let (device, head) = make_device_with_one_read(&mut bufs);

        let dispatched = device.poll_request_queue();
        assert_eq!(dispatched, 1);
        assert_eq!(device.task_cnt(), 0);

        // response field OK, status GOOD, resid 0 (full transfer)
        assert_eq!(bufs[2][RESP_RESPONSE_OFFSET], VIRTIO_SCSI_S_OK);
        assert_eq!(bufs[2][RESP_STATUS_OFFSET], SCSI_STATUS_GOOD);
        let resid = u32::from_le_bytes(bufs[2][RESP_RESID_OFFSET .. RESP_RESID_OFFSET + 4].try_into().unwrap());
        assert_eq!(resid, 0);

        let vqs = device.virtqueues.lock();
        assert_eq!(vqs[0].used_idx, 1);
        assert_eq!(vqs[0].used_ring[0], (head, 512));
    }

    #[test]
    fn request_to_unattached_lun_is_aborted_and_still_enqueued() {
        let mut bufs = [vec![0u8; 64], vec![0u8; 512], vec![0u8; 32]];
        let cdb = read10_cdb();
        bufs[0][18 .. 18 + cdb.len()].copy_from_slice(&cdb);

        let regions = vec![
            MemRegion {
                guest_phys_addr: 0x1000,
                userspace_addr: bufs[0].as_mut_ptr(),
                size: bufs[0].len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x2000,
                userspace_addr: bufs[1].as_mut_ptr(),
                size: bufs[1].len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x3000,
                userspace_addr: bufs[2].as_mut_ptr(),
                size: bufs[2].len() as u64,
            },
        ];
        let mem = MemTable::new(regions);

        let mut vq = Virtqueue::new(8);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 64,
            flags: VIRTQ_DESC_F_NEXT,
            next: 1,
        };
        vq.desc[1] = Desc {
            addr: 0x2000,
            len: 512,
            flags: VIRTQ_DESC_F_NEXT | VIRTQ_DESC_F_WRITE,
            next: 2,
        };
        vq.desc[2] = Desc {
            addr: 0x3000,
            len: 32,
            flags: VIRTQ_DESC_F_WRITE,
            next: 0,
        };
        vq.avail_ring[0] = 0;
        vq.avail_idx = 1;

        // no LUN attached to slot 0
        let device = Arc::new(VhostScsiDevice::new("vhost0", 1, 0, 0, vec![vq], mem));

        let dispatched = device.poll_request_queue();
        assert_eq!(dispatched, 1);
        assert_eq!(bufs[2][RESP_RESPONSE_OFFSET], VIRTIO_SCSI_S_ABORTED);

        let vqs = device.virtqueues.lock();
        assert_eq!(vqs[0].used_idx, 1);
        assert_eq!(vqs[0].used_ring[0].0, 0);
    }

    #[test]
    fn poll_request_queue_dispatches_and_advances_last_avail_idx() {
        let mut bufs = [vec![0u8; 64], vec![0u8; 512], vec![0u8; 32]];
        let (device, _head) = make_device_with_one_read(&mut bufs);

        let dispatched = device.poll_request_queue();
        assert_eq!(dispatched, 1);
        assert_eq!(device.task_cnt(), 0); // malloc completes synchronously
    }

    #[test]
    fn three_descriptor_chain_heads_all_dispatched_in_one_poll() {
        let mut req_buf = vec![0u8; 64 * 3];
        let cdb = read10_cdb();
        for i in 0..3 {
            req_buf[i * 64 + 18..i * 64 + 18 + cdb.len()].copy_from_slice(&cdb);
        }
        let mut payload_buf = vec![0u8; 512 * 3];
        let mut resp_buf = vec![0u8; 32 * 3];

        let mem = MemTable::new(vec![
            MemRegion {
                guest_phys_addr: 0x1000,
                userspace_addr: req_buf.as_mut_ptr(),
                size: req_buf.len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x2000,
                userspace_addr: payload_buf.as_mut_ptr(),
                size: payload_buf.len() as u64,
            },
            MemRegion {
                guest_phys_addr: 0x3000,
                userspace_addr: resp_buf.as_mut_ptr(),
                size: resp_buf.len() as u64,
            },
        ]);

        let mut vq = Virtqueue::new(16);
        for i in 0..3u16 {
            let base = i * 3;
            vq.desc[base as usize] = Desc {
                addr: 0x1000 + i as u64 * 64,
                len: 64,
                flags: VIRTQ_DESC_F_NEXT,
                next: base + 1,
            };
            vq.desc[base as usize + 1] = Desc {
                addr: 0x2000 + i as u64 * 512,
                len: 512,
                flags: VIRTQ_DESC_F_NEXT | VIRTQ_DESC_F_WRITE,
                next: base + 2,
            };
            vq.desc[base as usize + 2] = Desc {
                addr: 0x3000 + i as u64 * 32,
                len: 32,
                flags: VIRTQ_DESC_F_WRITE,
                next: 0,
            };
            vq.avail_ring[i as usize] = base;
        }
        vq.avail_idx = 3;

        let ops: Box<dyn BdevOps> = Box::new(MallocBdev::new(512, 64));
        let bdev = Arc::new(Bdev::new("malloc0", "malloc", 512, 64, ops));
        let lun = Arc::new(Lun::new("lun0", Box::new(BdevScsiBackend::new(bdev))));
        let mut device = VhostScsiDevice::new("vhost0", 1, 0, 0, vec![vq], mem);
        device.attach_lun(0, lun).unwrap();
        let device = Arc::new(device);

        let dispatched = device.poll_request_queue();
        assert_eq!(dispatched, 3);
        assert_eq!(device.virtqueues.lock()[0].last_avail_idx, 3);
        assert_eq!(device.task_cnt(), 0);
        assert_eq!(device.virtqueues.lock()[0].used_idx, 3);
    }

    #[test]
    #[should_panic(expected = "outstanding tasks")]
    fn stop_panics_if_task_cnt_never_reaches_zero() {
        let device = VhostScsiDevice::new("vhost0", 1, 0, 0, vec![Virtqueue::new(4)], MemTable::new(vec![]));
        device.task_cnt.store(1, Ordering::SeqCst);
        device.stop();
    }
}
