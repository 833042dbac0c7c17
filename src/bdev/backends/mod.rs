//! Concrete implementations of the bdev function table (spec §4.E):
//! `pmem`, `split`, `delay`, `crypto`, `ocssd`, plus `malloc` — a plain
//! in-memory backend other backends and tests build on the way the
//! `null`/`malloc` drivers ground the teacher's own bdev tests.

pub mod crypto;
pub mod delay;
pub mod malloc;
pub mod ocssd;
pub mod pmem;
pub mod split;
