//! Client configuration with defaults.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Reconnection attempts after an established connection is lost, `0` disables reconnection.
    pub max_reconnection_attempts: u32,
    /// Base delay between reconnection attempts. Doubles before every attempt.
    pub reconnection_delay: Duration,
    /// Initial capacity of the read buffer (in bytes).
    pub read_buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_reconnection_attempts: 10,
            reconnection_delay: Duration::from_millis(500),
            read_buffer_capacity: 4 * 1024, // 4 KB
        }
    }
}

/// Overrides for a [`ClientConfig`]; unset fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_reconnection_attempts: Option<u32>,
    pub reconnection_delay: Option<Duration>,
    pub read_buffer_capacity: Option<usize>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ClientConfig {
        ClientConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn merge(mut self, options: ClientOptions) -> ClientConfig {
        if let Some(host) = options.host {
            self.host = host;
        }
        if let Some(port) = options.port {
            self.port = port;
        }
        if let Some(attempts) = options.max_reconnection_attempts {
            self.max_reconnection_attempts = attempts;
        }
        if let Some(delay) = options.reconnection_delay {
            self.reconnection_delay = delay;
        }
        if let Some(capacity) = options.read_buffer_capacity {
            self.read_buffer_capacity = capacity;
        }
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ClientOptions> for ClientConfig {
    fn from(options: ClientOptions) -> Self {
        ClientConfig::default().merge(options)
    }
}
