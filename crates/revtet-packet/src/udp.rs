use crate::{ensure_len, read_u16, write_u16, PacketError};

/// View over a UDP datagram (header followed by its payload).
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpHeader<T> {
    pub const LEN: usize = 8;

    pub(crate) fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        ensure_len(buffer.as_ref(), Self::LEN)?;
        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 0)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    pub fn length(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 4)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 6)
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpHeader<T> {
    pub fn set_src_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 0, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 2, port);
    }

    pub fn swap_src_dst(&mut self) {
        let src = self.src_port();
        let dst = self.dst_port();
        self.set_src_port(dst);
        self.set_dst_port(src);
    }

    pub fn set_payload_len(&mut self, payload_len: u16) {
        write_u16(self.buffer.as_mut(), 4, Self::LEN as u16 + payload_len);
    }

    /// UDP checksums are disabled: the field is always written as 0 ("no checksum").
    pub fn compute_checksum(&mut self) {
        write_u16(self.buffer.as_mut(), 6, 0);
    }
}
