use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::client::Session;
use crate::RelayConfig;

/// A running device-channel listener.
///
/// Dropping the handle stops accepting and aborts every session without waiting for them.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_tx: Option<oneshot::Sender<()>>,
    accept_loop: Option<JoinHandle<usize>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting devices and waits until every session has released its flows.
    ///
    /// Returns how many sessions were still attached.
    pub async fn shutdown(mut self) -> usize {
        self.signal_stop();
        match self.accept_loop.take() {
            Some(accept_loop) => accept_loop.await.unwrap_or(0),
            None => 0,
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(accept_loop) = self.accept_loop.take() {
            accept_loop.abort();
        }
    }
}

/// Binds the device-channel listener; every accepted stream is one attached device.
pub async fn start_server(cfg: RelayConfig) -> std::io::Result<ServerHandle> {
    let listener = TcpListener::bind(cfg.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel();
    let accept_loop = tokio::spawn(accept_devices(listener, cfg, stop_rx));
    Ok(ServerHandle {
        local_addr,
        stop_tx: Some(stop_tx),
        accept_loop: Some(accept_loop),
    })
}

/// Attaches a session to every accepted stream until `stop_rx` fires, then aborts the sessions.
///
/// Client ids count up from 0 in accept order. Over the client cap, a stream is closed on accept.
async fn accept_devices(
    listener: TcpListener,
    cfg: RelayConfig,
    mut stop_rx: oneshot::Receiver<()>,
) -> usize {
    let client_slots = (cfg.max_clients != 0).then(|| Arc::new(Semaphore::new(cfg.max_clients)));
    let mut sessions = JoinSet::new();
    let mut next_client_id: u32 = 0;

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut stop_rx => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!("cannot accept device channel: {err}");
                    continue;
                }
            },
        };

        let slot = match &client_slots {
            None => None,
            Some(slots) => match slots.clone().try_acquire_owned() {
                Ok(slot) => Some(slot),
                Err(_) => {
                    tracing::warn!(%peer, max = cfg.max_clients, "client limit reached, dropping device channel");
                    continue;
                }
            },
        };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "cannot disable Nagle on device channel: {err}");
        }

        let client_id = next_client_id;
        next_client_id = next_client_id.wrapping_add(1);
        tracing::debug!(client = client_id, %peer, "device channel accepted");
        let session = Session::new(client_id, stream, &cfg);
        sessions.spawn(async move {
            let _slot = slot;
            if let Err(err) = session.run().await {
                tracing::debug!(client = client_id, "session ended: {err}");
            }
        });
    }

    let attached = sessions.len();
    tracing::info!(attached, "closing attached clients");
    // Dropping a session closes all of its flows.
    sessions.shutdown().await;
    attached
}
