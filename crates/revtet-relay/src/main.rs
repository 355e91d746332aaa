#![forbid(unsafe_code)]

use revtet_relay::{start_server, RelayConfig};

/// Resolves on the first termination request and names it.
async fn termination_requested() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            }
            Err(err) => {
                tracing::warn!("SIGTERM is not handled: {err}");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RelayConfig::from_env().map_err(|err| {
        tracing::error!("cannot load relay config: {err}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;
    let max_clients = config.max_clients;

    let relay = start_server(config).await?;
    tracing::info!(addr = %relay.local_addr(), max_clients, "waiting for devices");

    let signal = termination_requested().await;
    let attached = relay.shutdown().await;
    tracing::info!(signal, attached, "relay stopped");
    Ok(())
}
