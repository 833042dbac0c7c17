//! Turn one descriptor-chain head into iovecs and a CDB (spec §4.G,
//! steps 1-3). CDB interpretation itself stays external (spec §1); this
//! module only walks the chain, infers direction, and translates guest
//! addresses.

use snafu::Snafu;

use crate::core::Iovec;

use super::{
    mem_table::{MemTable, TranslateError},
    virtqueue::Virtqueue,
};

/// Offset of the CDB within the `cmd_req` header carried by the first
/// descriptor (8-byte LUN, 8-byte tag, 2 attribute bytes, then the CDB).
const CMD_REQ_CDB_OFFSET: usize = 18;
const CDB_LEN: usize = 32;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum RequestError {
    #[snafu(display("descriptor chain has no response descriptor"))]
    NoResponseDescriptor,
    #[snafu(display("request descriptor must not be guest-writable"))]
    RequestDescriptorWritable,
    #[snafu(display("empty descriptor chain"))]
    EmptyChain,
    #[snafu(display("failed to translate a guest address: {}", source))]
    Translate { source: TranslateError },
}

pub struct ParsedRequest {
    pub head: u16,
    pub cdb: Vec<u8>,
    pub iovs: Vec<Iovec>,
    pub is_write: bool,
    pub resp_ptr: *mut u8,
    pub resp_len: usize,
}

// Every pointer here addresses guest memory mapped for the device's
// lifetime; the vhost device serializes the chain's lifetime to one poll.
unsafe impl Send for ParsedRequest {}

impl std::fmt::Debug for ParsedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedRequest")
            .field("head", &self.head)
            .field("cdb", &self.cdb)
            .field("is_write", &self.is_write)
            .finish()
    }
}

/// Parse the chain rooted at `head` (spec §4.G steps 1-3): the request
/// descriptor carries the CDB, direction comes from the second
/// descriptor's write flag, and the final descriptor is always the
/// guest-writable response buffer.
pub fn parse_request(vq: &Virtqueue, mem: &MemTable, head: u16) -> Result<ParsedRequest, RequestError> {
    let chain = vq.chain(head);
    let request_desc = *chain.first().ok_or(RequestError::EmptyChain)?;
    if request_desc.is_write() {
        return RequestDescriptorWritable.fail();
    }
    if chain.len() < 2 {
        return NoResponseDescriptor.fail();
    }
    let response_desc = *chain.last().unwrap();
    if !response_desc.is_write() {
        return NoResponseDescriptor.fail();
    }

    let req_ptr = mem
        .translate(request_desc.addr, request_desc.len as u64)
        .map_err(|source| RequestError::Translate { source })?;
    let req_bytes = unsafe { std::slice::from_raw_parts(req_ptr, request_desc.len as usize) };
    let cdb_end = (CMD_REQ_CDB_OFFSET + CDB_LEN).min(req_bytes.len());
    let cdb = if req_bytes.len() > CMD_REQ_CDB_OFFSET {
        req_bytes[CMD_REQ_CDB_OFFSET..cdb_end].to_vec()
    } else {
        Vec::new()
    };

    let payload = &chain[1..chain.len() - 1];
    let is_write = payload.first().map(|d| !d.is_write()).unwrap_or(false);

    let mut iovs = Vec::with_capacity(payload.len());
    for d in payload {
        let ptr = mem
            .translate(d.addr, d.len as u64)
            .map_err(|source| RequestError::Translate { source })?;
        iovs.push(Iovec::new(ptr, d.len as usize));
    }

    let resp_ptr = mem
        .translate(response_desc.addr, response_desc.len as u64)
        .map_err(|source| RequestError::Translate { source })?;

    Ok(ParsedRequest {
        head,
        cdb,
        iovs,
        is_write,
        resp_ptr,
        resp_len: response_desc.len as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhost::{
        mem_table::MemRegion,
        virtqueue::{Desc, VIRTQ_DESC_F_NEXT, VIRTQ_DESC_F_WRITE},
    };

    fn region(backing: &mut [u8], gpa: u64) -> MemRegion {
        MemRegion {
            guest_phys_addr: gpa,
            userspace_addr: backing.as_mut_ptr(),
            size: backing.len() as u64,
        }
    }

    #[test]
    fn read_request_direction_from_second_descriptor() {
        let mut req_buf = vec![0u8; 64];
        req_buf[CMD_REQ_CDB_OFFSET] = 0x28; // READ_10
        let mut payload_buf = vec![0u8; 512];
        let mut resp_buf = vec![0u8; 32];

        let mem = MemTable::new(vec![
            region(&mut req_buf, 0x1000),
            region(&mut payload_buf, 0x2000),
            region(&mut resp_buf, 0x3000),
        ]);

        let mut vq = Virtqueue::new(4);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 64,
            flags: VIRTQ_DESC_F_NEXT,
            next: 1,
        };
        vq.desc[1] = Desc {
            addr: 0x2000,
            len: 512,
            flags: VIRTQ_DESC_F_NEXT | VIRTQ_DESC_F_WRITE,
            next: 2,
        };
        vq.desc[2] = Desc {
            addr: 0x3000,
            len: 32,
            flags: VIRTQ_DESC_F_WRITE,
            next: 0,
        };

        let parsed = parse_request(&vq, &mem, 0).unwrap();
        assert_eq!(parsed.cdb[0], 0x28);
        assert!(!parsed.is_write);
        assert_eq!(parsed.iovs.len(), 1);
        assert_eq!(parsed.resp_len, 32);
    }

    #[test]
    fn missing_response_descriptor_rejected() {
        let mut req_buf = vec![0u8; 64];
        let mem = MemTable::new(vec![region(&mut req_buf, 0x1000)]);
        let mut vq = Virtqueue::new(4);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 64,
            flags: 0,
            next: 0,
        };
        assert_eq!(
            parse_request(&vq, &mem, 0).unwrap_err(),
            RequestError::NoResponseDescriptor
        );
    }

    #[test]
    fn writable_request_descriptor_rejected() {
        let mut req_buf = vec![0u8; 64];
        let mem = MemTable::new(vec![region(&mut req_buf, 0x1000)]);
        let mut vq = Virtqueue::new(4);
        vq.desc[0] = Desc {
            addr: 0x1000,
            len: 64,
            flags: VIRTQ_DESC_F_WRITE,
            next: 0,
        };
        assert_eq!(
            parse_request(&vq, &mem, 0).unwrap_err(),
            RequestError::RequestDescriptorWritable
        );
    }
}
