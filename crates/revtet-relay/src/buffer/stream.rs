use std::collections::VecDeque;
use std::io;

/// Bounded byte FIFO.
///
/// Writes are all-or-nothing: a chunk that does not fit is refused without buffering any of it,
/// so the producer can retry the identical chunk later.
#[derive(Debug)]
pub struct StreamBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Appends `chunk` entirely, or not at all.
    pub fn try_push(&mut self, chunk: &[u8]) -> bool {
        if chunk.len() > self.remaining() {
            return false;
        }
        self.data.extend(chunk);
        true
    }

    /// Hands buffered bytes to `write` until it stops accepting them.
    ///
    /// `write` behaves like a non-blocking socket write. `WouldBlock` ends the drain and is not
    /// reported; any other error is returned, with the unwritten bytes left in place. A write that
    /// accepts zero bytes is reported as `WriteZero`.
    pub fn write_with<F>(&mut self, mut write: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        let mut total = 0;
        while !self.data.is_empty() {
            let (front, _) = self.data.as_slices();
            match write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.data.drain(..n);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    /// Removes and returns up to `max` bytes from the front.
    pub fn take_chunk(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.data.len());
        self.data.drain(..n).collect()
    }
}
