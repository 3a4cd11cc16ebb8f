//! Network configuration for the gateway's HTTP listener.

use std::time::Duration;

/// Listener and transport-level settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Largest request body accepted, in bytes.
    pub body_limit: usize,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            body_limit: 2 * 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}
