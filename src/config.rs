//! Command line configuration

use std::time::Duration;

use clap::Parser;

use crate::registry::RegistryConfig;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// WebSocket signaling relay
#[derive(Debug, Clone, Parser)]
#[command(name = "signal_relay", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Seconds a client has to register before it is evicted
    #[arg(long, default_value_t = 10)]
    pub register_timeout_secs: u64,

    /// Room server base URL to notify when a client is evicted
    #[arg(long)]
    pub room_server: Option<String>,

    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value_t = 60)]
    pub status_interval_secs: u64,
}

impl Config {
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            registration_timeout: self.register_timeout(),
            notify_url: self.room_server.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["signal_relay"]);
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.register_timeout(), Duration::from_secs(10));
        assert_eq!(config.status_interval(), Some(Duration::from_secs(60)));
        assert!(config.registry_config().notify_url.is_none());
    }

    #[test]
    fn test_flags() {
        let config = Config::parse_from([
            "signal_relay",
            "--addr",
            "0.0.0.0:9000",
            "--register-timeout-secs",
            "3",
            "--room-server",
            "https://rooms.example.com",
            "--status-interval-secs",
            "0",
        ]);
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(
            config.registry_config().registration_timeout,
            Duration::from_secs(3)
        );
        assert_eq!(
            config.registry_config().notify_url.as_deref(),
            Some("https://rooms.example.com")
        );
        assert!(config.status_interval().is_none());
    }
}
