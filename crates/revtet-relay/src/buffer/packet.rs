use revtet_packet::ipv4::{peek_datagram_len, peek_version};
use revtet_packet::MAX_PACKET_LENGTH;

/// Reassembles datagrams from the device byte stream.
///
/// Bytes are appended as they arrive; [`Self::next_datagram`] exposes the next complete datagram
/// in place, and [`Self::advance`] releases it. A returned slice borrows the buffer, so it cannot
/// outlive the next append.
pub struct Ipv4PacketBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
    current: usize,
}

impl Ipv4PacketBuffer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_PACKET_LENGTH].into_boxed_slice(),
            head: 0,
            len: 0,
            current: 0,
        }
    }

    /// Bytes waiting to be delimited.
    pub fn buffered(&self) -> usize {
        self.len - self.head
    }

    /// Copies as much of `data` as fits and returns how many bytes were taken.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        if self.head > 0 {
            self.buf.copy_within(self.head..self.len, 0);
            self.len -= self.head;
            self.head = 0;
            self.current = 0;
        }
        let n = data.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// The next complete datagram, if all of its bytes have arrived.
    ///
    /// A header announcing a length that cannot be a datagram (shorter than its own header, or
    /// larger than the buffer) leaves no way to find the next boundary; everything buffered is
    /// discarded.
    pub fn next_datagram(&mut self) -> Option<&[u8]> {
        let available = &self.buf[self.head..self.len];
        let len = peek_datagram_len(available)?;
        let min_len = if peek_version(available) == Some(6) { 40 } else { 20 };
        if len < min_len || len > self.buf.len() {
            tracing::warn!(
                len,
                discarded = available.len(),
                "undelimitable datagram from device, discarding buffered bytes"
            );
            self.head = 0;
            self.len = 0;
            self.current = 0;
            return None;
        }
        if len > available.len() {
            return None;
        }
        self.current = len;
        Some(&self.buf[self.head..self.head + len])
    }

    /// Releases the datagram last returned by [`Self::next_datagram`].
    pub fn advance(&mut self) {
        self.head += self.current;
        self.current = 0;
        if self.head == self.len {
            self.head = 0;
            self.len = 0;
        }
    }
}

impl Default for Ipv4PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
