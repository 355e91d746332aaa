use std::collections::VecDeque;
use std::io;

/// Each queued datagram is accounted with a 2-byte length prefix, as if stored back to back in
/// one circular area.
const LENGTH_PREFIX: usize = 2;

/// Bounded FIFO of whole datagrams, with capacity measured in bytes.
#[derive(Debug)]
pub struct DatagramBuffer {
    datagrams: VecDeque<Vec<u8>>,
    used: usize,
    capacity: usize,
}

impl DatagramBuffer {
    pub const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;

    pub fn new(capacity: usize) -> Self {
        Self {
            datagrams: VecDeque::new(),
            used: 0,
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.datagrams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datagrams.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Queues a copy of `datagram`; refuses it when it is too large or there is no room.
    pub fn try_push(&mut self, datagram: &[u8]) -> bool {
        if datagram.len() > Self::MAX_DATAGRAM_LEN {
            return false;
        }
        let cost = LENGTH_PREFIX + datagram.len();
        if cost > self.remaining() {
            return false;
        }
        self.datagrams.push_back(datagram.to_vec());
        self.used += cost;
        true
    }

    /// Sends the oldest datagram through `send`.
    ///
    /// Returns `Ok(false)` when the buffer is empty. On error the datagram stays queued.
    pub fn send_front<F>(&mut self, send: F) -> io::Result<bool>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        let Some(front) = self.datagrams.front() else {
            return Ok(false);
        };
        let sent = send(front)?;
        if sent != front.len() {
            tracing::warn!(sent, len = front.len(), "datagram truncated by the socket");
        }
        if let Some(front) = self.datagrams.pop_front() {
            self.used -= LENGTH_PREFIX + front.len();
        }
        Ok(true)
    }
}
