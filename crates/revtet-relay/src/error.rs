use revtet_packet::IpProtocol;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unsupported {0} message")]
    Unsupported(IpProtocol),
    #[error("device channel closed")]
    DeviceClosed,
}
