use std::net::SocketAddr;
use std::time::Duration;

use revtet_relay::{start_server, RelayConfig};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> RelayConfig {
    RelayConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..RelayConfig::default()
    }
}

async fn attach(addr: SocketAddr) -> (TcpStream, u32) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut id = [0u8; 4];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut id))
        .await
        .expect("no client id from relay")
        .unwrap();
    (stream, u32::from_be_bytes(id))
}

#[tokio::test]
async fn clients_are_numbered_in_accept_order() {
    let server = start_server(test_config()).await.unwrap();
    let addr = server.local_addr();

    let (_first, first_id) = attach(addr).await;
    let (_second, second_id) = attach(addr).await;
    assert_eq!(first_id, 0);
    assert_eq!(second_id, 1);

    assert_eq!(server.shutdown().await, 2);
}

#[tokio::test]
async fn connections_over_the_client_limit_are_closed() {
    let server = start_server(RelayConfig {
        max_clients: 1,
        ..test_config()
    })
    .await
    .unwrap();
    let addr = server.local_addr();

    let (_first, first_id) = attach(addr).await;
    assert_eq!(first_id, 0);

    let mut extra = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 4];
    let n = tokio::time::timeout(TIMEOUT, extra.read(&mut buf))
        .await
        .expect("extra connection was neither served nor closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert_eq!(server.shutdown().await, 1);
}

#[tokio::test]
async fn shutdown_closes_attached_devices() {
    let server = start_server(test_config()).await.unwrap();
    let (mut device, _) = attach(server.local_addr()).await;

    assert_eq!(server.shutdown().await, 1);

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(TIMEOUT, device.read(&mut buf))
        .await
        .expect("device channel stayed open after shutdown")
        .unwrap_or(0);
    assert_eq!(n, 0);
}
