//! Crypto vbdev: applies a keystream to data in flight and delegates to
//! a base bdev. Key management is out of scope (spec §1 non-goals); the
//! key arrives as an opaque byte string the vbdev never interprets.

use std::sync::Arc;

use crate::{
    bdev::{Bdev, BdevIo, BdevOps, IoType, SubmitError},
    core::Iovec,
};

/// XORs every byte against a repeating key. Not a real cipher — a
/// deterministic, dependency-free stand-in that lets tests assert the
/// transform actually ran without this crate taking on key-management
/// scope it explicitly excludes.
pub struct CryptoBdev {
    base: Arc<Bdev>,
    key: Vec<u8>,
}

fn apply_keystream(iovs: &[Iovec], key: &[u8]) {
    let mut pos = 0usize;
    for iov in iovs {
        let buf = unsafe { std::slice::from_raw_parts_mut(iov.ptr, iov.len) };
        for byte in buf.iter_mut() {
            *byte ^= key[pos % key.len()];
            pos += 1;
        }
    }
}

impl CryptoBdev {
    pub fn new(base: Arc<Bdev>, key: Vec<u8>) -> Self {
        assert!(!key.is_empty(), "crypto vbdev requires a nonempty key");
        Self {
            base,
            key,
        }
    }
}

impl BdevOps for CryptoBdev {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        match io.io_type {
            IoType::Write => {
                // Encrypt in place before handing to the base, then
                // restore plaintext once the write completes so the
                // caller's own buffer reads back unchanged.
                apply_keystream(&io.iovs, &self.key);
                let key = self.key.clone();
                let iovs = io.iovs.clone();
                let channel = self.base.get_io_channel(0);
                let BdevIo {
                    io_type,
                    offset_blocks,
                    num_blocks,
                    iovs: fwd_iovs,
                    ..
                } = io;
                let wrapped = BdevIo::new(io_type, offset_blocks, num_blocks, fwd_iovs, move |_status| {
                    apply_keystream(&iovs, &key);
                });
                let _ = self.base.submit(&channel, wrapped);
            }
            IoType::Read => {
                let key = self.key.clone();
                let iovs = io.iovs.clone();
                let channel = self.base.get_io_channel(0);
                let BdevIo {
                    io_type,
                    offset_blocks,
                    num_blocks,
                    iovs: fwd_iovs,
                    ..
                } = io;
                let wrapped = BdevIo::new(io_type, offset_blocks, num_blocks, fwd_iovs, move |_status| {
                    apply_keystream(&iovs, &key);
                });
                let _ = self.base.submit(&channel, wrapped);
            }
            _ => {
                let channel = self.base.get_io_channel(0);
                let _ = self.base.submit(&channel, io);
            }
        }
        Ok(())
    }

    fn io_type_supported(&self, io_type: IoType) -> bool {
        self.base.io_type_supported(io_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdev::{backends::malloc::MallocBdev, registry, IoStatus};

    #[test]
    fn read_after_write_recovers_plaintext() {
        let base = Bdev::new("crypto-base", "malloc", 512, 16, Box::new(MallocBdev::new(512, 16)));
        let base = registry::global().lock().register(base).unwrap();
        let crypto = CryptoBdev::new(base, vec![0x42, 0x17, 0x99]);

        let mut plaintext = vec![0xA5u8; 512];
        let expected = plaintext.clone();
        crypto
            .submit_request(BdevIo::new(IoType::Write, 0, 1, vec![Iovec::new(plaintext.as_mut_ptr(), 512)], |s| {
                assert_eq!(s, IoStatus::Success)
            }))
            .unwrap();
        assert_eq!(plaintext, expected, "caller's buffer must read back as plaintext after completion");

        let mut dst = vec![0u8; 512];
        crypto
            .submit_request(BdevIo::new(IoType::Read, 0, 1, vec![Iovec::new(dst.as_mut_ptr(), 512)], |s| {
                assert_eq!(s, IoStatus::Success)
            }))
            .unwrap();
        assert_eq!(dst, expected);
    }
}
