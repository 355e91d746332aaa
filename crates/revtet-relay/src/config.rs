use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND: &str = "127.0.0.1:31416";
const DEFAULT_DEVICE_QUEUE: usize = 16;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the device-channel listener binds.
    pub bind_addr: SocketAddr,
    /// Depth of the bounded chunk queues between a session and its device reader/writer tasks.
    pub device_queue: usize,
    /// How long an ICMP reachability probe may take before the echo request is dropped.
    pub probe_timeout: Duration,
    /// Maximum simultaneous client sessions; 0 disables the limit.
    pub max_clients: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 31416)),
            device_queue: DEFAULT_DEVICE_QUEUE,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_clients: 0,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; absent keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let bind_addr = lookup("REVTET_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.into())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::InvalidEnv("REVTET_BIND", err.to_string()))?;

        let device_queue = parse_or("REVTET_DEVICE_QUEUE", &lookup, DEFAULT_DEVICE_QUEUE)?;
        if device_queue == 0 {
            return Err(ConfigError::InvalidEnv(
                "REVTET_DEVICE_QUEUE",
                "must be at least 1".into(),
            ));
        }

        let probe_timeout_ms = parse_or("REVTET_PROBE_TIMEOUT_MS", &lookup, DEFAULT_PROBE_TIMEOUT_MS)?;
        let max_clients = parse_or("REVTET_MAX_CLIENTS", &lookup, 0usize)?;

        Ok(Self {
            bind_addr,
            device_queue,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            max_clients,
        })
    }
}

fn parse_or<T, F>(key: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigError::InvalidEnv(key, err.to_string())),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}: {1}")]
    InvalidEnv(&'static str, String),
}
