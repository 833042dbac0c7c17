//! Per-core cooperative scheduler.
//!
//! Each reactor owns one pinned OS thread (the process' CPU-core model, see
//! [`Cores`]), an unbounded cross-core event queue, and a list of pollers. A
//! reactor drains its event queue first, then runs every continuous poller,
//! then runs every timed poller whose deadline has elapsed, in registration
//! order. There is no preemption: a poller that blocks stalls its whole core
//! (spec §5).
//!
//! Reactors are always spinning while `RUNNING`; cross-core events wake no
//! one, matching the "no blocking syscalls inside a poller" discipline this
//! crate relies on for correctness (spec §9, "Coroutines/async").

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use once_cell::sync::OnceCell;

use crate::core::{
    event::Event,
    poller::{Builder as PollerBuilder, Poller, PollerId},
};

pub const INIT: usize = 0;
pub const RUNNING: usize = 1;
pub const SHUTDOWN: usize = 2;

/// The set of logical cores this process owns, one reactor per core.
pub struct Cores(Vec<u32>);

impl Cores {
    pub fn count(n: u32) -> Self {
        Cores((0 .. n).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn first(&self) -> u32 {
        self.0[0]
    }
}

thread_local! {
    /// The core id of the OS thread executing this code, set once when a
    /// reactor thread starts. Looking this up from a non-reactor thread is a
    /// programming error.
    static CURRENT_CORE: Cell<Option<u32>> = Cell::new(None);
}

pub struct Reactor {
    lcore: u32,
    state: AtomicUsize,
    pollers: RefCell<Vec<Poller>>,
    /// Pending poller-ids to drop on this reactor's next tick, paired with
    /// the completion event to fire once removed.
    unregister_queue: RefCell<VecDeque<(PollerId, Event)>>,
    sx: Sender<Event>,
    rx: Receiver<Event>,
}

unsafe impl Sync for Reactor {}
unsafe impl Send for Reactor {}

pub struct Reactors(Vec<Reactor>);

unsafe impl Sync for Reactors {}
unsafe impl Send for Reactors {}

static REACTOR_LIST: OnceCell<Reactors> = OnceCell::new();
static STOP_RC: AtomicUsize = AtomicUsize::new(0);

impl Reactors {
    /// Initialize one reactor per core. Must be called once, before any
    /// reactor thread is launched.
    pub fn init(core_count: u32) {
        REACTOR_LIST.get_or_init(|| {
            Reactors(
                Cores::count(core_count)
                    .iter()
                    .map(Reactor::new)
                    .collect(),
            )
        });
    }

    pub fn get_by_core(core: u32) -> Option<&'static Reactor> {
        REACTOR_LIST.get()?.0.iter().find(|r| r.lcore == core)
    }

    /// The reactor owning the calling OS thread. Panics off-reactor.
    pub fn current() -> &'static Reactor {
        let core = CURRENT_CORE
            .with(|c| c.get())
            .expect("not running on a reactor thread");
        Self::get_by_core(core).expect("no reactor for current core")
    }

    pub fn master() -> &'static Reactor {
        let list = REACTOR_LIST.get().expect("reactors not initialized");
        &list.0[0]
    }

    pub fn iter() -> impl Iterator<Item = &'static Reactor> {
        REACTOR_LIST.get().expect("reactors not initialized").0.iter()
    }

    /// Launch every reactor but the master (core 0) on its own pinned OS
    /// thread, then run the master's loop on the calling thread. Returns
    /// once every reactor has observed `SHUTDOWN`.
    pub fn launch_all() {
        let master = Reactors::master().lcore;
        let mut handles = Vec::new();
        for reactor in Reactors::iter() {
            if reactor.lcore == master {
                continue;
            }
            let core = reactor.lcore;
            handles.push(
                thread::Builder::new()
                    .name(format!("reactor_{}", core))
                    .spawn(move || {
                        CURRENT_CORE.with(|c| c.set(Some(core)));
                        Reactors::get_by_core(core).unwrap().run_loop();
                    })
                    .expect("failed to spawn reactor thread"),
            );
        }
        CURRENT_CORE.with(|c| c.set(Some(master)));
        Reactors::master().run_loop();
        for h in handles {
            let _ = h.join();
        }
    }
}

impl Reactor {
    fn new(lcore: u32) -> Self {
        let (sx, rx) = unbounded();
        Self {
            lcore,
            state: AtomicUsize::new(INIT),
            pollers: RefCell::new(Vec::new()),
            unregister_queue: RefCell::new(VecDeque::new()),
            sx,
            rx,
        }
    }

    pub fn core(&self) -> u32 {
        self.lcore
    }

    pub fn running(&self) {
        self.state.store(RUNNING, Ordering::Release);
    }

    pub fn shutdown(&self) {
        self.state.store(SHUTDOWN, Ordering::Release);
    }

    pub fn state(&self) -> usize {
        self.state.load(Ordering::Acquire)
    }

    /// Register a poller that begins firing on this reactor's next
    /// iteration. Only meaningful when called from the owning reactor's
    /// thread (matches spec §4.A: "registered by owning reactor only").
    pub fn register_poller(&self, builder: PollerBuilder) -> PollerId {
        let poller = builder.build();
        let id = poller.id();
        self.pollers.borrow_mut().push(poller);
        id
    }

    /// Asynchronously unregister a poller: it is removed from this
    /// reactor's list (so its fn is guaranteed not to fire again), then
    /// `completion` is enqueued as an event for the caller to observe.
    pub fn unregister_poller(&self, id: PollerId, completion: Event) {
        self.unregister_queue.borrow_mut().push_back((id, completion));
    }

    fn drain_unregistrations(&self) {
        let mut queue = self.unregister_queue.borrow_mut();
        if queue.is_empty() {
            return;
        }
        let mut pollers = self.pollers.borrow_mut();
        while let Some((id, completion)) = queue.pop_front() {
            pollers.retain(|p| p.id() != id);
            completion.run();
        }
    }

    /// Enqueue an event on this reactor; wakes no one, the target reactor
    /// observes it on its next iteration (spec §4.A `event_call`).
    pub fn send_event(&self, event: Event) {
        self.sx.send(event).expect("reactor event queue closed");
    }

    /// Drain the cross-core event queue in FIFO order, then run every
    /// poller due this tick, in registration order.
    pub fn poll_once(&self) {
        while let Ok(event) = self.rx.try_recv() {
            event.run();
        }
        self.drain_unregistrations();
        let now = Instant::now();
        let mut pollers = self.pollers.borrow_mut();
        for poller in pollers.iter_mut() {
            poller.tick(now);
        }
    }

    /// The reactor's main loop: spin while `RUNNING`, exit on `SHUTDOWN`.
    pub fn run_loop(&self) {
        self.running();
        loop {
            match self.state() {
                RUNNING => self.poll_once(),
                SHUTDOWN => break,
                _ => panic!("invalid reactor state"),
            }
        }
        // drain one last time so in-flight unregister completions fire
        // before the thread exits.
        self.poll_once();
    }
}

/// Enqueue `event` on `core`'s reactor (spec §4.A `event_call`).
pub fn event_call(core: u32, event: Event) {
    Reactors::get_by_core(core)
        .expect("event_call to unknown core")
        .send_event(event);
}

/// Stop every reactor; each drains its queue and exits its loop. `rc` is
/// recorded for the caller to retrieve as the process exit code.
pub fn app_stop(rc: usize) {
    STOP_RC.store(rc, Ordering::Release);
    for reactor in Reactors::iter() {
        reactor.shutdown();
    }
}

pub fn app_stop_rc() -> usize {
    STOP_RC.load(Ordering::Acquire)
}

/// Cooperative sleep used by pollers that intentionally throttle a core
/// (e.g. a developer-mode delay); never call this from hot I/O paths.
pub fn poller_sleep(d: Duration) {
    thread::sleep(d);
}
