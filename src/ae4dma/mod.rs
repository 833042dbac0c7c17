//! AE4DMA driver: a fixed-layout descriptor ring, per-engine command
//! queues, and the channel that turns iovec copies into descriptors
//! (spec §3 "AE4DMA Channel", §4.C, §6 "AE4DMA MMIO layout").

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod queue;

pub use channel::{Ae4dmaChannel, MAX_HW_QUEUES};
pub use descriptor::{DescStatus, HwDescriptor};
pub use error::Ae4dmaError;
pub use queue::{CmdQueue, DESCRIPTORS_PER_QUEUE};
