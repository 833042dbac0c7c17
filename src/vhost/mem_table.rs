//! Guest-physical-address to vhost-virtual-address translation (spec §4.G
//! "GPA→VVA mapping"). Built once from the memory-region table fetched at
//! device attach and immutable for the device's lifetime; only rebuilt on
//! reconfigure (spec §9 "shared-memory access to guest physical
//! addresses").

use snafu::Snafu;

/// One guest memory region, as handed over by the vhost-user control
/// channel at attach time.
#[derive(Debug, Clone, Copy)]
pub struct MemRegion {
    pub guest_phys_addr: u64,
    pub userspace_addr: *mut u8,
    pub size: u64,
}

// Points at guest memory mapped for the device's lifetime; the owning
// vhost device already serializes access to it per virtqueue poll.
unsafe impl Send for MemRegion {}
unsafe impl Sync for MemRegion {}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TranslateError {
    #[snafu(display("guest address {:#x} (len {}) is not covered by any mapped region", gpa, len))]
    Unmapped { gpa: u64, len: u64 },
}

/// A small sorted-region lookup (spec §9), rebuilt only on reconfigure.
/// Guest pointers are never held across poll boundaries; callers
/// re-translate every time a chain is walked.
#[derive(Debug, Default)]
pub struct MemTable {
    regions: Vec<MemRegion>,
}

impl MemTable {
    pub fn new(mut regions: Vec<MemRegion>) -> Self {
        regions.sort_by_key(|r| r.guest_phys_addr);
        Self {
            regions,
        }
    }

    /// Translate a guest-physical span to a host pointer. The span must lie
    /// entirely within one region.
    pub fn translate(&self, gpa: u64, len: u64) -> Result<*mut u8, TranslateError> {
        let region = self
            .regions
            .iter()
            .find(|r| gpa >= r.guest_phys_addr && gpa + len <= r.guest_phys_addr + r.size);
        match region {
            Some(r) => {
                let offset = gpa - r.guest_phys_addr;
                Ok(unsafe { r.userspace_addr.add(offset as usize) })
            }
            None => Unmapped {
                gpa,
                len,
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_finds_containing_region() {
        let mut backing = vec![0u8; 4096];
        let base = backing.as_mut_ptr();
        let table = MemTable::new(vec![MemRegion {
            guest_phys_addr: 0x1000,
            userspace_addr: base,
            size: 4096,
        }]);
        let host = table.translate(0x1010, 16).unwrap();
        assert_eq!(host, unsafe { base.add(0x10) });
    }

    #[test]
    fn translate_rejects_span_crossing_region_boundary() {
        let mut backing = vec![0u8; 4096];
        let base = backing.as_mut_ptr();
        let table = MemTable::new(vec![MemRegion {
            guest_phys_addr: 0x1000,
            userspace_addr: base,
            size: 4096,
        }]);
        assert_eq!(
            table.translate(0x1ff0, 32),
            Err(TranslateError::Unmapped {
                gpa: 0x1ff0,
                len: 32
            })
        );
    }

    #[test]
    fn translate_picks_correct_region_among_several() {
        let mut a = vec![0u8; 4096];
        let mut b = vec![0u8; 4096];
        let table = MemTable::new(vec![
            MemRegion {
                guest_phys_addr: 0x2000,
                userspace_addr: b.as_mut_ptr(),
                size: 4096,
            },
            MemRegion {
                guest_phys_addr: 0x1000,
                userspace_addr: a.as_mut_ptr(),
                size: 4096,
            },
        ]);
        let host = table.translate(0x2100, 8).unwrap();
        assert_eq!(host, unsafe { b.as_mut_ptr().add(0x100) });
    }
}
