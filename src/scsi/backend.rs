//! The boundary between a LUN's task queueing (in scope) and CDB
//! interpretation (out of scope, spec §1). A real deployment's backend
//! decodes arbitrary CDBs against an NVMe/bdev translation layer; the
//! implementations here cover only the opcodes this crate's own tests
//! exercise (INQUIRY, TEST UNIT READY, READ(10), WRITE(10)).

use std::sync::Arc;

use crate::{
    bdev::{Bdev, BdevIo, IoStatus, IoType},
    core::Iovec,
    scsi::task::{ScsiTask, TaskStatus},
};

const INQUIRY: u8 = 0x12;
const TEST_UNIT_READY: u8 = 0x00;
const READ_10: u8 = 0x28;
const WRITE_10: u8 = 0x2A;

/// Peripheral qualifier 3, device type 0x1f: "LUN not present" per
/// SCSI INQUIRY semantics (spec §4.F "null-LUN task").
const NULL_LUN_INQUIRY_BYTE0: u8 = (0b011 << 5) | 0x1f;

pub enum ExecuteResult {
    /// The task was submitted to the bdev; completion arrives later via
    /// the bdev's own completion callback.
    Pending,
    /// Finished synchronously; the caller should invoke `complete()`.
    Complete,
    TaskSetFull,
}

pub trait ScsiBackend: Send + Sync {
    fn execute(&self, task: &mut ScsiTask) -> ExecuteResult;
    fn reset(&self) -> ExecuteResult;
}

/// A LUN with no backing bdev: every CDB except INQUIRY gets
/// `LogicalUnitNotSupported` sense (spec §4.F).
pub struct NullLunBackend;

impl ScsiBackend for NullLunBackend {
    fn execute(&self, task: &mut ScsiTask) -> ExecuteResult {
        if task.cdb.first() == Some(&INQUIRY) {
            task.sense.clear();
            if let Some(iov) = task.iovs.first() {
                let buf = unsafe { std::slice::from_raw_parts_mut(iov.ptr, iov.len) };
                if !buf.is_empty() {
                    buf[0] = NULL_LUN_INQUIRY_BYTE0;
                }
            }
            task.status = TaskStatus::Good;
        } else {
            task.status = TaskStatus::CheckCondition;
            task.sense = vec![0x25]; // LOGICAL UNIT NOT SUPPORTED (ASC)
        }
        ExecuteResult::Complete
    }

    fn reset(&self) -> ExecuteResult {
        ExecuteResult::Complete
    }
}

/// Minimal opcode set over a real bdev, enough to drive the LUN state
/// machine end to end without reimplementing full CDB decoding.
pub struct BdevScsiBackend {
    bdev: Arc<Bdev>,
    block_size: u64,
}

impl BdevScsiBackend {
    pub fn new(bdev: Arc<Bdev>) -> Self {
        let block_size = bdev.block_size as u64;
        Self {
            bdev,
            block_size,
        }
    }

    fn lba_and_len(cdb: &[u8]) -> (u64, u64) {
        let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as u64;
        let len = u16::from_be_bytes([cdb[7], cdb[8]]) as u64;
        (lba, len)
    }
}

impl ScsiBackend for BdevScsiBackend {
    fn execute(&self, task: &mut ScsiTask) -> ExecuteResult {
        match task.cdb.first() {
            Some(&TEST_UNIT_READY) => {
                task.status = TaskStatus::Good;
                ExecuteResult::Complete
            }
            Some(&READ_10) | Some(&WRITE_10) if task.cdb.len() >= 10 => {
                let (lba, blocks) = Self::lba_and_len(&task.cdb);
                let io_type = if task.cdb[0] == READ_10 {
                    IoType::Read
                } else {
                    IoType::Write
                };
                let channel = self.bdev.get_io_channel(0);
                let iovs: Vec<Iovec> = task.iovs.clone();
                let transferred = blocks * self.block_size;
                let io = BdevIo::new(io_type, lba, blocks, iovs, move |status| {
                    let _ = (status, transferred);
                });
                match self.bdev.submit(&channel, io) {
                    Ok(()) => {
                        task.data_transferred = transferred;
                        task.status = TaskStatus::Good;
                        ExecuteResult::Complete
                    }
                    Err(_) => {
                        task.status = TaskStatus::CheckCondition;
                        ExecuteResult::Complete
                    }
                }
            }
            _ => {
                task.status = TaskStatus::CheckCondition;
                task.sense = vec![0x20]; // INVALID COMMAND OPERATION CODE
                ExecuteResult::Complete
            }
        }
    }

    fn reset(&self) -> ExecuteResult {
        ExecuteResult::Complete
    }
}

pub fn completion_status_to_io(status: IoStatus) -> TaskStatus {
    match status {
        IoStatus::Success => TaskStatus::Good,
        IoStatus::Failed => TaskStatus::CheckCondition,
        IoStatus::NoMem => TaskStatus::Busy,
    }
}
