//! NVMe-over-Fabrics target: subsystem/listener/session model, admin+I/O
//! queue dispatch, multi-mode namespaces (spec §3 "NVMf Subsystem",
//! §4.H). RDMA/TCP transport plumbing and NVMe command decoding are
//! external concerns (spec §1); this module owns the subsystem registry,
//! address parsing, config clamps, and the connection state machine.

pub mod connection;
pub mod error;
pub mod listener;
pub mod subsystem;
pub mod target;

pub use connection::{Connection, ConnectionState, QpairRole, Session};
pub use error::NvmfError;
pub use listener::ListenAddr;
pub use subsystem::{Backing, Mode, Namespace, SubType, Subsystem, SubsystemTable};
pub use target::{NvmfTgtOpts, Target};
