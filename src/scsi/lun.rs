//! LUN lifecycle: two queues (`pending_tasks`, `active_tasks`) and the
//! drain loop that reacts to what the backend returns (spec §3 "SCSI
//! LUN", §4.F).

use std::{collections::VecDeque, thread::ThreadId};

use parking_lot::Mutex;
use snafu::Snafu;

use super::{
    backend::ExecuteResult,
    task::{ManagementFunction, ScsiTask, TaskResponse, TaskStatus},
    ScsiBackend,
};

#[derive(Debug, Snafu)]
pub enum LunError {
    #[snafu(display("io_channel for lun {} already allocated", name))]
    AlreadyAllocated { name: String },
    #[snafu(display("lun {} io_channel must be (re)allocated from its owning thread", name))]
    WrongThread { name: String },
}

pub struct Lun {
    pub name: String,
    backend: Box<dyn ScsiBackend>,
    owning_thread: Mutex<Option<ThreadId>>,
    channel_allocated: Mutex<bool>,
    pending_tasks: Mutex<VecDeque<ScsiTask>>,
    active_tasks: Mutex<Vec<ScsiTask>>,
}

impl Lun {
    pub fn new(name: impl Into<String>, backend: Box<dyn ScsiBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
            owning_thread: Mutex::new(None),
            channel_allocated: Mutex::new(false),
            pending_tasks: Mutex::new(VecDeque::new()),
            active_tasks: Mutex::new(Vec::new()),
        }
    }

    /// May only be called from the thread that will poll the LUN (spec
    /// §4.F "Channel ownership"); a LUN's channel may be allocated at
    /// most once.
    pub fn allocate_io_channel(&self) -> Result<(), LunError> {
        let current = std::thread::current().id();
        let mut owner = self.owning_thread.lock();
        if let Some(existing) = *owner {
            if existing != current {
                return WrongThread {
                    name: self.name.clone(),
                }
                .fail();
            }
        }
        let mut allocated = self.channel_allocated.lock();
        if *allocated {
            return AlreadyAllocated {
                name: self.name.clone(),
            }
            .fail();
        }
        *owner = Some(current);
        *allocated = true;
        Ok(())
    }

    pub fn append_task(&self, task: ScsiTask) {
        self.pending_tasks.lock().push_back(task);
    }

    pub fn pending_len(&self) -> usize {
        self.pending_tasks.lock().len()
    }

    pub fn active_len(&self) -> usize {
        self.active_tasks.lock().len()
    }

    /// Drain `pending_tasks`, dispatching each to the backend (spec
    /// §4.F table): `Pending` moves the task to `active_tasks`,
    /// `Complete` fires its completion callback, `TaskSetFull` stops
    /// draining and leaves the rest on pending.
    pub fn execute_tasks(&self) {
        loop {
            let mut task = {
                let mut pending = self.pending_tasks.lock();
                match pending.pop_front() {
                    Some(t) => t,
                    None => break,
                }
            };
            match self.dispatch(&mut task) {
                ExecuteResult::Pending => {
                    self.active_tasks.lock().push(task);
                }
                ExecuteResult::Complete => {
                    task.complete();
                }
                ExecuteResult::TaskSetFull => {
                    task.status = TaskStatus::TaskSetFull;
                    self.pending_tasks.lock().push_front(task);
                    break;
                }
            }
        }
    }

    fn dispatch(&self, task: &mut ScsiTask) -> ExecuteResult {
        if let Some(function) = task.function {
            return self.task_management(function, task);
        }
        self.backend.execute(task)
    }

    /// `abort_task`/`abort_task_set` reject (spec §9 open question,
    /// resolved here to preserve legacy behavior — see DESIGN.md);
    /// `lun_reset` delegates to the backend, then drains both queues.
    fn task_management(&self, function: ManagementFunction, task: &mut ScsiTask) -> ExecuteResult {
        match function {
            ManagementFunction::AbortTask | ManagementFunction::AbortTaskSet => {
                task.response = TaskResponse::TaskMgmtRejected;
                ExecuteResult::Complete
            }
            ManagementFunction::LunReset => {
                self.backend.reset();
                self.abort_all();
                task.response = TaskResponse::TaskMgmtSuccess;
                ExecuteResult::Complete
            }
        }
    }

    fn abort_all(&self) {
        let mut pending: Vec<_> = self.pending_tasks.lock().drain(..).collect();
        let mut active: Vec<_> = self.active_tasks.lock().drain(..).collect();
        for task in pending.iter_mut().chain(active.iter_mut()) {
            task.status = TaskStatus::Aborted;
            task.response = TaskResponse::Aborted;
            task.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::backend::NullLunBackend;

    #[test]
    fn pending_then_active_then_done_never_goes_backward() {
        let lun = Lun::new("lun0", Box::new(NullLunBackend));
        let done = std::sync::Arc::new(Mutex::new(false));
        let done2 = done.clone();
        let task = ScsiTask::new(vec![0x12], vec![], move |t| {
            assert_eq!(t.status, TaskStatus::Good);
            *done2.lock() = true;
        });
        lun.append_task(task);
        assert_eq!(lun.pending_len(), 1);
        lun.execute_tasks();
        assert_eq!(lun.pending_len(), 0);
        assert_eq!(lun.active_len(), 0);
        assert!(*done.lock());
    }

    #[test]
    fn null_lun_inquiry_crafted_response() {
        let lun = Lun::new("lun0", Box::new(NullLunBackend));
        let mut buf = vec![0xffu8; 96];
        let done = std::sync::Arc::new(Mutex::new(None));
        let done2 = done.clone();
        let task = ScsiTask::new(
            vec![0x12],
            vec![crate::core::Iovec::new(buf.as_mut_ptr(), buf.len())],
            move |t| {
                *done2.lock() = Some(t.status);
            },
        );
        lun.append_task(task);
        lun.execute_tasks();
        assert_eq!(*done.lock(), Some(TaskStatus::Good));
        assert_eq!(buf[0], 0b011_00000 | 0x1f);
    }

    #[test]
    fn abort_task_rejected() {
        let lun = Lun::new("lun0", Box::new(NullLunBackend));
        let response = std::sync::Arc::new(Mutex::new(None));
        let response2 = response.clone();
        let task = ScsiTask::management(ManagementFunction::AbortTask, move |t| {
            *response2.lock() = Some(t.response);
        });
        lun.append_task(task);
        lun.execute_tasks();
        assert_eq!(*response.lock(), Some(TaskResponse::TaskMgmtRejected));
    }

    #[test]
    fn lun_reset_drains_pending_and_active() {
        let lun = Lun::new("lun0", Box::new(NullLunBackend));
        lun.append_task(ScsiTask::new(vec![0x00], vec![], |_| {}));
        let reset_done = std::sync::Arc::new(Mutex::new(false));
        let reset_done2 = reset_done.clone();
        lun.append_task(ScsiTask::management(ManagementFunction::LunReset, move |t| {
            assert_eq!(t.response, TaskResponse::TaskMgmtSuccess);
            *reset_done2.lock() = true;
        }));
        lun.execute_tasks();
        assert!(*reset_done.lock());
        assert_eq!(lun.pending_len(), 0);
        assert_eq!(lun.active_len(), 0);
    }

    #[test]
    fn channel_reallocation_from_other_thread_rejected() {
        let lun = std::sync::Arc::new(Lun::new("lun0", Box::new(NullLunBackend)));
        lun.allocate_io_channel().unwrap();
        let lun2 = lun.clone();
        let handle = std::thread::spawn(move || lun2.allocate_io_channel());
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(LunError::WrongThread { .. })));
    }
}
