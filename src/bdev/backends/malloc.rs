//! In-memory bdev backend. Every other backend in this crate that needs a
//! concrete byte store (pmem's pools, a crypto vbdev's test fixtures)
//! builds on the same `Vec<u8>`-behind-a-`Mutex` model as this one.

use parking_lot::Mutex;

use crate::bdev::{BdevIo, BdevOps, IoStatus, IoType, SubmitError};

pub struct MallocBdev {
    block_size: u32,
    data: Mutex<Vec<u8>>,
}

impl MallocBdev {
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            block_size,
            data: Mutex::new(vec![0u8; block_size as usize * block_count as usize]),
        }
    }
}

impl BdevOps for MallocBdev {
    fn submit_request(&self, io: BdevIo) -> Result<(), (SubmitError, BdevIo)> {
        let start = io.offset_blocks as usize * self.block_size as usize;
        let len = io.num_blocks as usize * self.block_size as usize;
        let mut data = self.data.lock();
        match io.io_type {
            IoType::Read => {
                let mut off = 0;
                for iov in &io.iovs {
                    let dst = unsafe { std::slice::from_raw_parts_mut(iov.ptr, iov.len) };
                    dst.copy_from_slice(&data[start + off .. start + off + iov.len]);
                    off += iov.len;
                }
            }
            IoType::Write => {
                let mut off = 0;
                for iov in &io.iovs {
                    let src = unsafe { std::slice::from_raw_parts(iov.ptr, iov.len) };
                    data[start + off .. start + off + iov.len].copy_from_slice(src);
                    off += iov.len;
                }
            }
            IoType::WriteZeroes => {
                data[start .. start + len].iter_mut().for_each(|b| *b = 0);
            }
            IoType::Unmap | IoType::Flush | IoType::Reset => {}
        }
        drop(data);
        io.complete(IoStatus::Success);
        Ok(())
    }

    fn io_type_supported(&self, _io_type: IoType) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Iovec;

    #[test]
    fn write_then_read_roundtrips() {
        let bdev = MallocBdev::new(512, 16);
        let mut src = vec![0xAAu8; 512];
        bdev.submit_request(BdevIo::new(
            IoType::Write,
            0,
            1,
            vec![Iovec::new(src.as_mut_ptr(), 512)],
            |status| assert_eq!(status, IoStatus::Success),
        ))
        .unwrap();

        let mut dst = vec![0u8; 512];
        bdev.submit_request(BdevIo::new(
            IoType::Read,
            0,
            1,
            vec![Iovec::new(dst.as_mut_ptr(), 512)],
            |status| assert_eq!(status, IoStatus::Success),
        ))
        .unwrap();
        assert_eq!(dst, src);
    }
}
