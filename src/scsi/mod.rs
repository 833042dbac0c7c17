//! SCSI LUN lifecycle and task state machine (spec §3 "SCSI LUN"/"SCSI
//! Task", §4.F). SCSI CDB interpretation itself is an external concern
//! (spec §1); [`ScsiBackend`] is the seam — this module owns the queues,
//! the pending→active→done transition, and task management, not how a
//! CDB becomes a bdev operation.

pub mod backend;
pub mod lun;
pub mod task;

pub use backend::{BdevScsiBackend, ExecuteResult, NullLunBackend, ScsiBackend};
pub use lun::{Lun, LunError};
pub use task::{ManagementFunction, ScsiTask, TaskResponse, TaskStatus};
