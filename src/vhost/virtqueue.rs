//! The virtio split-ring layout: descriptor table, avail ring, used ring
//! (spec §3 "Vhost SCSI Device", §4.G). Descriptor chains live in guest
//! memory and are walked through [`crate::vhost::mem_table::MemTable`];
//! this module only tracks ring indices and the bookkeeping around them.

pub const VIRTQ_DESC_F_NEXT: u16 = 1;
pub const VIRTQ_DESC_F_WRITE: u16 = 2;

pub const VRING_AVAIL_F_NO_INTERRUPT: u16 = 1;
pub const VIRTIO_F_NOTIFY_ON_EMPTY: u64 = 1 << 24;

/// One descriptor in the guest-resident descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct Desc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

impl Desc {
    pub fn has_next(&self) -> bool {
        self.flags & VIRTQ_DESC_F_NEXT != 0
    }

    pub fn is_write(&self) -> bool {
        self.flags & VIRTQ_DESC_F_WRITE != 0
    }
}

/// One virtqueue (spec §3): descriptor table plus avail/used rings and the
/// host-side indices tracking how far each has been consumed/produced.
#[derive(Debug)]
pub struct Virtqueue {
    pub desc: Vec<Desc>,
    pub avail_ring: Vec<u16>,
    pub avail_flags: u16,
    pub avail_idx: u16,
    pub used_ring: Vec<(u16, u32)>,
    pub used_flags: u16,
    pub used_idx: u16,
    pub size: u16,
    pub last_avail_idx: u16,
    pub last_used_idx: u16,
    pub callfd: Option<i32>,
    pub kickfd: Option<i32>,
}

impl Virtqueue {
    pub fn new(size: u16) -> Self {
        Self {
            desc: vec![
                Desc {
                    addr: 0,
                    len: 0,
                    flags: 0,
                    next: 0
                };
                size as usize
            ],
            avail_ring: vec![0; size as usize],
            avail_flags: 0,
            avail_idx: 0,
            used_ring: vec![(0, 0); size as usize],
            used_flags: 0,
            used_idx: 0,
            size,
            last_avail_idx: 0,
            last_used_idx: 0,
            callfd: None,
            kickfd: None,
        }
    }

    /// Claim up to `max` new descriptor-chain heads published since the
    /// last poll, advancing `last_avail_idx` by the count claimed (spec
    /// §4.G "request queue").
    pub fn avail_ring_get(&mut self, max: usize) -> Vec<u16> {
        let available = self.avail_idx.wrapping_sub(self.last_avail_idx) as usize;
        let claim = available.min(max);
        let mut heads = Vec::with_capacity(claim);
        for i in 0..claim {
            let slot = (self.last_avail_idx as usize + i) % self.size as usize;
            heads.push(self.avail_ring[slot]);
        }
        self.last_avail_idx = self.last_avail_idx.wrapping_add(claim as u16);
        heads
    }

    /// Walk the descriptor chain starting at `head`.
    pub fn chain(&self, head: u16) -> Vec<Desc> {
        let mut out = Vec::new();
        let mut idx = head;
        loop {
            let d = self.desc[idx as usize];
            let has_next = d.has_next();
            out.push(d);
            if !has_next {
                break;
            }
            idx = d.next;
        }
        out
    }

    /// Publish a completed chain's head and byte count, advancing
    /// `used_idx`. Returns whether the guest should be kicked via
    /// `callfd`, per `VRING_AVAIL_F_NO_INTERRUPT`/`VIRTIO_F_NOTIFY_ON_EMPTY`
    /// (spec §4.G).
    pub fn used_ring_enqueue(&mut self, head: u16, len: u32, negotiated_features: u64) -> bool {
        let slot = self.used_idx as usize % self.size as usize;
        self.used_ring[slot] = (head, len);
        self.used_idx = self.used_idx.wrapping_add(1);

        let notify_suppressed = self.avail_flags & VRING_AVAIL_F_NO_INTERRUPT != 0;
        let notify_on_empty = negotiated_features & VIRTIO_F_NOTIFY_ON_EMPTY != 0;
        let queue_now_empty = self.used_idx == self.avail_idx;
        !notify_suppressed || (notify_on_empty && queue_now_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_avail(vq: &mut Virtqueue, head: u16) {
        let slot = vq.avail_idx as usize % vq.size as usize;
        vq.avail_ring[slot] = head;
        vq.avail_idx = vq.avail_idx.wrapping_add(1);
    }

    #[test]
    fn avail_ring_get_advances_last_avail_idx_by_claimed_count() {
        let mut vq = Virtqueue::new(8);
        push_avail(&mut vq, 0);
        push_avail(&mut vq, 1);
        push_avail(&mut vq, 2);
        let heads = vq.avail_ring_get(32);
        assert_eq!(heads, vec![0, 1, 2]);
        assert_eq!(vq.last_avail_idx, 3);
    }

    #[test]
    fn avail_ring_get_caps_at_max_per_poll() {
        let mut vq = Virtqueue::new(8);
        for h in 0..5 {
            push_avail(&mut vq, h);
        }
        let heads = vq.avail_ring_get(3);
        assert_eq!(heads.len(), 3);
        assert_eq!(vq.last_avail_idx, 3);
        let rest = vq.avail_ring_get(32);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn chain_follows_next_flags_to_terminal_descriptor() {
        let mut vq = Virtqueue::new(4);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 16,
            flags: VIRTQ_DESC_F_NEXT,
            next: 1,
        };
        vq.desc[1] = Desc {
            addr: 0x2000,
            len: 512,
            flags: VIRTQ_DESC_F_WRITE,
            next: 0,
        };
        let chain = vq.chain(0);
        assert_eq!(chain.len(), 2);
        assert!(!chain[1].has_next());
        assert!(chain[1].is_write());
    }

    #[test]
    fn used_ring_enqueue_notifies_unless_suppressed() {
        let mut vq = Virtqueue::new(4);
        push_avail(&mut vq, 0);
        assert!(vq.used_ring_enqueue(0, 512, 0));

        vq.avail_flags = VRING_AVAIL_F_NO_INTERRUPT;
        push_avail(&mut vq, 1);
        assert!(!vq.used_ring_enqueue(1, 512, 0));
    }
}
