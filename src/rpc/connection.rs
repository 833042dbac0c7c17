//! Per-connection receive buffer (spec §4.I's `{recv_buffer, outstanding_requests}`),
//! draining one complete frame at a time off whatever byte chunks arrive.

use super::framer::{scan_frame, FrameResult};

#[derive(Debug, Default)]
pub struct Connection {
    recv_buffer: Vec<u8>,
    pub outstanding_requests: usize,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.recv_buffer.extend_from_slice(bytes);
    }

    /// Pull one complete top-level frame out of the buffer, if present.
    /// `Ok(None)` means keep buffering; `Err(())` means the connection saw
    /// a protocol violation and must be closed (spec §7 kind 4).
    pub fn pop_frame(&mut self) -> Result<Option<Vec<u8>>, ()> {
        match scan_frame(&self.recv_buffer) {
            FrameResult::Incomplete => Ok(None),
            FrameResult::Error => Err(()),
            FrameResult::Consumed(n) => Ok(Some(self.recv_buffer.drain(..n).collect())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_by_byte_feed_yields_nothing_until_the_final_brace() {
        let full = br#"{"jsonrpc":"2.0","method":"a","id":1}"#;
        let mut conn = Connection::new();
        for &b in &full[..full.len() - 1] {
            conn.feed(&[b]);
            assert_eq!(conn.pop_frame().unwrap(), None);
        }
        conn.feed(&full[full.len() - 1..]);
        assert_eq!(conn.pop_frame().unwrap(), Some(full.to_vec()));
    }

    #[test]
    fn two_frames_fed_at_once_drain_one_at_a_time() {
        let mut conn = Connection::new();
        conn.feed(br#"{"a":1}{"b":2}"#);
        assert_eq!(conn.pop_frame().unwrap(), Some(br#"{"a":1}"#.to_vec()));
        assert_eq!(conn.pop_frame().unwrap(), Some(br#"{"b":2}"#.to_vec()));
        assert_eq!(conn.pop_frame().unwrap(), None);
    }

    #[test]
    fn leading_garbage_is_a_protocol_violation() {
        let mut conn = Connection::new();
        conn.feed(b"not json");
        assert!(conn.pop_frame().is_err());
    }
}
