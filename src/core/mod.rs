//! `core` contains the reactor/poller runtime and the memory primitives that
//! the rest of the data plane is built on (spec §4.A, §4.B).

pub mod dma;
pub mod event;
pub mod mempool;
pub mod poller;
pub mod reactor;

pub use dma::{CopyTriple, DmaBuf, IdentityTranslator, IovIter, Iovec, PhysAddrTranslator};
pub use event::Event;
pub use mempool::MemoryPool;
pub use poller::{Builder as PollerBuilder, Poller, PollerId};
pub use reactor::{app_stop, app_stop_rc, event_call, Cores, Reactor, Reactors};
