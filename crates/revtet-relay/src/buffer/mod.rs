//! Staging buffers between the device channel and the network sockets.

mod datagram;
mod packet;
mod stream;

pub use datagram::DatagramBuffer;
pub use packet::Ipv4PacketBuffer;
pub use stream::StreamBuffer;
