//! Hugepage-style allocator, scatter-gather iovec, and the virt→phys
//! translation seam. The real `virt_to_phys` is an external, hardware/kernel
//! concern (spec §1); here it is a trait so the AE4DMA driver and its tests
//! can be exercised against a fake without touching real memory mappings.

use snafu::Snafu;

/// One contiguous span of bytes, as handed to the AE4DMA driver or a vhost
/// payload translation.
#[derive(Debug, Clone, Copy)]
pub struct Iovec {
    pub ptr: *mut u8,
    pub len: usize,
}

impl Iovec {
    pub fn new(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr,
            len,
        }
    }
}

// The pointer addresses caller-owned DMA memory that outlives the I/O;
// callers crossing a core boundary already serialize access around it.
unsafe impl Send for Iovec {}

/// A page-aligned, process-local stand-in for hugepage memory. Backing a
/// `Vec<u8>` is sufficient for the single-process model this crate targets;
/// real hugepage reservation is an environment/PCI concern handled outside
/// this crate's scope.
pub struct DmaBuf {
    buf: Vec<u8>,
}

impl DmaBuf {
    pub fn zeroed(len: usize) -> Self {
        Self {
            buf: vec![0u8; len],
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn as_iovec(&mut self) -> Iovec {
        Iovec::new(self.buf.as_mut_ptr(), self.buf.len())
    }
}

#[derive(Debug, Snafu)]
pub enum TranslationError {
    #[snafu(display("address {:p} could not be translated to a physical address", addr))]
    Untranslatable { addr: *const u8 },
}

// raw pointers in the error are diagnostic only, never dereferenced across
// threads by the error type itself.
unsafe impl Send for TranslationError {}
unsafe impl Sync for TranslationError {}

/// Virtual-to-physical address translation, returning the physical address
/// of `addr` plus the length of the contiguous run starting there (which may
/// be shorter than requested if a page boundary intervenes). Implemented
/// outside this crate in a real deployment (spec §1); callers that only need
/// byte semantics for testing use [`IdentityTranslator`].
pub trait PhysAddrTranslator {
    fn vtophys(&self, addr: *const u8, len: usize) -> Result<(u64, usize), TranslationError>;
}

/// Test/loopback translator: physical address equals the virtual address
/// cast to `u64`, and the whole requested length is always "contiguous".
/// Never used outside tests and the AE4DMA driver's own unit tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl PhysAddrTranslator for IdentityTranslator {
    fn vtophys(&self, addr: *const u8, len: usize) -> Result<(u64, usize), TranslationError> {
        if addr.is_null() {
            return Untranslatable {
                addr,
            }
            .fail();
        }
        Ok((addr as u64, len))
    }
}

/// One `(src_ptr, dst_ptr, len)` triple produced by walking two iovec
/// arrays jointly, the unit of work the AE4DMA driver turns into
/// descriptors (spec §4.C).
#[derive(Debug, Clone, Copy)]
pub struct CopyTriple {
    pub src: *mut u8,
    pub dst: *mut u8,
    pub len: usize,
}

/// Joint src/dst iovec walker (`ioviter_first`/`ioviter_next` in spec
/// terms). Splits at whichever of the two current spans is shorter, so
/// every yielded triple is byte-addressable in both the source and the
/// destination buffer.
#[derive(Debug)]
pub struct IovIter<'a> {
    src: &'a [Iovec],
    dst: &'a [Iovec],
    src_idx: usize,
    dst_idx: usize,
    src_off: usize,
    dst_off: usize,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum IovIterError {
    #[snafu(display("source and destination iovecs cover different total lengths"))]
    LengthMismatch,
    #[snafu(display("zero-length iovec entry"))]
    ZeroLength,
}

impl<'a> IovIter<'a> {
    pub fn new(src: &'a [Iovec], dst: &'a [Iovec]) -> Result<Self, IovIterError> {
        let total = |v: &[Iovec]| -> Result<usize, IovIterError> {
            let mut sum = 0usize;
            for iov in v {
                if iov.len == 0 {
                    return ZeroLength.fail();
                }
                sum += iov.len;
            }
            Ok(sum)
        };
        if total(src)? != total(dst)? {
            return LengthMismatch.fail();
        }
        Ok(Self {
            src,
            dst,
            src_idx: 0,
            dst_idx: 0,
            src_off: 0,
            dst_off: 0,
        })
    }
}

impl<'a> Iterator for IovIter<'a> {
    type Item = CopyTriple;

    fn next(&mut self) -> Option<Self::Item> {
        if self.src_idx >= self.src.len() || self.dst_idx >= self.dst.len() {
            return None;
        }
        let src_iov = self.src[self.src_idx];
        let dst_iov = self.dst[self.dst_idx];
        let src_remain = src_iov.len - self.src_off;
        let dst_remain = dst_iov.len - self.dst_off;
        let len = src_remain.min(dst_remain);

        let triple = CopyTriple {
            src: unsafe { src_iov.ptr.add(self.src_off) },
            dst: unsafe { dst_iov.ptr.add(self.dst_off) },
            len,
        };

        self.src_off += len;
        self.dst_off += len;
        if self.src_off == src_iov.len {
            self.src_idx += 1;
            self.src_off = 0;
        }
        if self.dst_off == dst_iov.len {
            self.dst_idx += 1;
            self.dst_off = 0;
        }
        Some(triple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_walk_splits_at_shorter_span() {
        let mut a = vec![0u8; 4];
        let mut b = vec![0u8; 2];
        let mut c = vec![0u8; 6];
        let src = [Iovec::new(a.as_mut_ptr(), 4), Iovec::new(b.as_mut_ptr(), 2)];
        let dst = [Iovec::new(c.as_mut_ptr(), 6)];
        let triples: Vec<_> = IovIter::new(&src, &dst).unwrap().collect();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].len, 4);
        assert_eq!(triples[1].len, 2);
    }

    #[test]
    fn mismatched_totals_rejected() {
        let mut a = vec![0u8; 4];
        let mut c = vec![0u8; 6];
        let src = [Iovec::new(a.as_mut_ptr(), 4)];
        let dst = [Iovec::new(c.as_mut_ptr(), 6)];
        assert_eq!(IovIter::new(&src, &dst).unwrap_err(), IovIterError::LengthMismatch);
    }

    #[test]
    fn zero_length_segment_rejected() {
        let mut a = vec![0u8; 0];
        let src = [Iovec::new(a.as_mut_ptr(), 0)];
        let dst = [Iovec::new(a.as_mut_ptr(), 0)];
        assert_eq!(IovIter::new(&src, &dst).unwrap_err(), IovIterError::ZeroLength);
    }

    #[test]
    fn identity_translator_roundtrips() {
        let mut buf = [1u8, 2, 3];
        let (phys, run) = IdentityTranslator.vtophys(buf.as_mut_ptr(), 3).unwrap();
        assert_eq!(phys, buf.as_mut_ptr() as u64);
        assert_eq!(run, 3);
    }
}
