// ABOUTME: Broker configuration, for binding, startup, and per-session queueing

use std::time::Duration;

/// Configuration for a broker's listener and its sessions.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// First port tried when binding.
    pub base_port: u16,
    /// How many ports above `base_port` to try before giving up.
    pub port_scan_range: u16,
    /// Capacity of each session's outbound frame queue. Once full, new
    /// frames are dropped rather than blocking the publisher.
    pub queue_max_size: usize,
    /// How long a session's writer task keeps draining its queue after
    /// shutdown is signalled, before giving up on any frames still unsent.
    pub drain_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            base_port: 7878,
            port_scan_range: 100,
            queue_max_size: 30,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl BrokerConfig {
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_queue_max_size(mut self, queue_max_size: usize) -> Self {
        self.queue_max_size = queue_max_size;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}
