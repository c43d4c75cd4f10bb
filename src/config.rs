//! Configuration types.

use std::net::SocketAddr;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: SocketAddr,
    /// Number of worker loops executing tasks in parallel.
    pub workers: usize,
    /// Capacity of the task-change broadcast ring. A slow observer that
    /// falls more than this many events behind is lagged and re-synced.
    pub broadcast_capacity: usize,
    /// Fallback interval between claim attempts when no wake-up arrives.
    pub claim_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7878".parse().expect("static bind address"),
            workers: 2,
            broadcast_capacity: 256,
            claim_poll_interval: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Load configuration from `CURATOR_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("CURATOR_BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.bind_addr);

        let workers = std::env::var("CURATOR_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.workers);

        let broadcast_capacity = std::env::var("CURATOR_BROADCAST_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.broadcast_capacity);

        let claim_poll_interval = std::env::var("CURATOR_CLAIM_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.claim_poll_interval);

        Self {
            bind_addr,
            workers,
            broadcast_capacity,
            claim_poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.workers > 0);
        assert!(config.broadcast_capacity > 0);
        assert_eq!(config.bind_addr.port(), 7878);
    }
}
