//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the tally server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections across all rooms.
    pub max_connections: usize,
    /// Heartbeat Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client after this many seconds without a Pong.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024, // 64 KB — frames are tiny JSON objects
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_with_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_heartbeat_windows() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.heartbeat_timeout_secs, 90);
    }

    #[test]
    fn default_limits() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.max_message_size, 64 * 1024);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            max_connections: 10,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            max_message_size: 1024,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.max_connections, cfg.max_connections);
        assert_eq!(back.heartbeat_interval_secs, cfg.heartbeat_interval_secs);
        assert_eq!(back.heartbeat_timeout_secs, cfg.heartbeat_timeout_secs);
        assert_eq!(back.max_message_size, cfg.max_message_size);
    }
}
