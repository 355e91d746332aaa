use crate::{checksum, ensure_len, read_u16, write_u16, PacketError};

/// View over an ICMP message (8-byte header followed by its payload).
///
/// ICMP has no ports; flow identification uses the echo identifier in place of the source port
/// and 0 in place of the destination port.
#[derive(Debug, Clone, Copy)]
pub struct IcmpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpHeader<T> {
    pub const LEN: usize = 8;

    pub const TYPE_ECHO_REPLY: u8 = 0;
    pub const TYPE_ECHO_REQUEST: u8 = 8;

    pub(crate) fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        ensure_len(buffer.as_ref(), Self::LEN)?;
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer.as_ref()[0]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    pub fn identifier(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 4)
    }

    pub fn sequence(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 6)
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == Self::TYPE_ECHO_REQUEST
    }

    pub fn src_port(&self) -> u16 {
        self.identifier()
    }

    pub fn dst_port(&self) -> u16 {
        0
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::LEN..]
    }

    pub fn checksum_valid(&self) -> bool {
        checksum::internet_checksum(self.buffer.as_ref()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpHeader<T> {
    /// Turns the message into an echo reply (type 0, code 0).
    pub fn set_echo_reply(&mut self) {
        let buf = self.buffer.as_mut();
        buf[0] = Self::TYPE_ECHO_REPLY;
        buf[1] = 0;
    }

    pub fn set_sequence(&mut self, seq: u16) {
        write_u16(self.buffer.as_mut(), 6, seq);
    }

    /// Resets the checksum field, then sums header and payload.
    pub fn compute_checksum(&mut self) {
        let buf = self.buffer.as_mut();
        write_u16(buf, 2, 0);
        let csum = checksum::internet_checksum(buf);
        write_u16(buf, 2, csum);
    }
}
