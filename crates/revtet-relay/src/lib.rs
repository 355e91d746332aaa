//! Userspace IPv4 relay for a tethered device.
//!
//! The device sends raw IPv4 datagrams over a byte channel. Each [`client::Session`] parses them,
//! opens matching TCP/UDP sockets (ICMP echo is answered from a reachability probe), and writes
//! well-formed response datagrams back to the device.
#![forbid(unsafe_code)]

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod connection_id;
pub mod error;
pub mod router;
pub mod server;

pub use client::{ClientOutput, Session};
pub use config::{ConfigError, RelayConfig};
pub use connection_id::ConnectionId;
pub use error::RelayError;
pub use router::Router;
pub use server::{start_server, ServerHandle};
