//! A SCSI task (spec §3 "SCSI Task"). `free_fn` runs on drop, standing in
//! for the legacy reference-counted "destruction releases pooled
//! buffers" behavior; Rust's ownership already gives the single-owner
//! guarantee the original's manual refcount existed to enforce, so there
//! is no separate `ref_count` field here — a task simply moves between
//! queues until it is dropped.

use crate::core::Iovec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Good,
    CheckCondition,
    Busy,
    TaskSetFull,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResponse {
    Complete,
    TaskMgmtSuccess,
    TaskMgmtRejected,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementFunction {
    AbortTask,
    AbortTaskSet,
    LunReset,
}

pub struct ScsiTask {
    pub cdb: Vec<u8>,
    pub iovs: Vec<Iovec>,
    pub data_transferred: u64,
    pub status: TaskStatus,
    pub sense: Vec<u8>,
    pub response: TaskResponse,
    pub function: Option<ManagementFunction>,
    free_fn: Option<Box<dyn FnOnce() + Send>>,
    cpl_fn: Option<Box<dyn FnOnce(&ScsiTask) + Send>>,
}

unsafe impl Send for ScsiTask {}

impl ScsiTask {
    pub fn new(cdb: Vec<u8>, iovs: Vec<Iovec>, cpl_fn: impl FnOnce(&ScsiTask) + Send + 'static) -> Self {
        Self {
            cdb,
            iovs,
            data_transferred: 0,
            status: TaskStatus::Good,
            sense: Vec::new(),
            response: TaskResponse::Complete,
            function: None,
            free_fn: None,
            cpl_fn: Some(Box::new(cpl_fn)),
        }
    }

    pub fn management(function: ManagementFunction, cpl_fn: impl FnOnce(&ScsiTask) + Send + 'static) -> Self {
        Self {
            cdb: Vec::new(),
            iovs: Vec::new(),
            data_transferred: 0,
            status: TaskStatus::Good,
            sense: Vec::new(),
            response: TaskResponse::Complete,
            function: Some(function),
            free_fn: None,
            cpl_fn: Some(Box::new(cpl_fn)),
        }
    }

    pub fn on_free(&mut self, f: impl FnOnce() + Send + 'static) {
        self.free_fn = Some(Box::new(f));
    }

    /// Invoke the completion callback. Idempotent: calling it more than
    /// once is a programming error the caller must avoid (spec §7:
    /// "completion callbacks always fire exactly once").
    pub fn complete(&mut self) {
        if let Some(cb) = self.cpl_fn.take() {
            cb(self);
        }
    }
}

impl Drop for ScsiTask {
    fn drop(&mut self) {
        if let Some(f) = self.free_fn.take() {
            f();
        }
    }
}
