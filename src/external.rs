//! Interfaces this crate calls against but does not implement (spec §1:
//! "describe only interfaces"): the RPC transport socket, NBD kernel
//! ioctl surface, PCI config-space enumeration, and SCSI CDB / NVMe
//! command decoding. `virt_to_phys` has its own stand-in,
//! [`crate::core::dma::PhysAddrTranslator`].
//!
//! Each trait here is the minimal shape the in-scope components call
//! through, sized so the in-scope logic compiles and is testable against
//! a fake; no trait here is meant to be a faithful transport/decoder.

/// The byte stream a JSON-RPC [`crate::rpc::connection::Connection`] is
/// fed from, standing in for the TCP/Unix socket layer (spec §6).
pub trait RpcTransport {
    fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn send(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

/// `stop_nbd_disk`'s backing surface: the kernel `/dev/nbd*` ioctl
/// interface (spec §6). `NBD_DISCONNECT` is the only operation this
/// crate's RPC method needs.
pub trait NbdTransport {
    fn disconnect(&self, nbd_device: &str) -> std::io::Result<()>;
}

/// One PCI function as read from config space: just enough for a caller
/// to decide NUMA affinity (spec §4.H) and BAR-map an AE4DMA engine
/// (spec §4.C), without reimplementing enumeration.
pub trait PciDevice {
    fn bdf(&self) -> String;
    fn numa_node(&self) -> u32;
    fn bar0(&self) -> *mut u8;
}

/// SCSI CDB interpretation is out of scope (spec §1); the LUN/task layer
/// only needs to know the opcode byte to route INQUIRY vs. everything
/// else (spec §4.F), which this trait exposes without decoding the rest.
pub trait ScsiCdbDecoder {
    fn opcode(&self, cdb: &[u8]) -> u8;
}

/// NVMe command decoding is out of scope (spec §1); the NVMf layer only
/// needs the opcode to dispatch admin vs. I/O handling (spec §4.H).
pub trait NvmeCommandDecoder {
    fn opcode(&self, cmd: &[u8]) -> u8;
}

/// Stand-in `NbdTransport` used where no real kernel ioctl surface is
/// wired up; `stop_nbd_disk` (spec §6) acknowledges the request without
/// a device to actually disconnect.
pub struct NullNbdTransport;

impl NbdTransport for NullNbdTransport {
    fn disconnect(&self, _nbd_device: &str) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstByteOpcode;
    impl ScsiCdbDecoder for FirstByteOpcode {
        fn opcode(&self, cdb: &[u8]) -> u8 {
            cdb.first().copied().unwrap_or(0)
        }
    }

    #[test]
    fn null_nbd_transport_always_succeeds() {
        assert!(NullNbdTransport.disconnect("nbd0").is_ok());
    }

    #[test]
    fn first_byte_opcode_reads_cdb_head() {
        assert_eq!(FirstByteOpcode.opcode(&[0x12, 0x00]), 0x12);
    }
}
