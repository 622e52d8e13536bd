use std::time::Duration;

/// Route the upgrade endpoint is served on unless configured otherwise.
pub const DEFAULT_PATH: &str = "/ws";

/// Tunables for a hub and the WebSocket endpoint in front of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Transport write buffer, in bytes. Passed straight to the upgrade; the
    /// read side keeps the transport's own buffering.
    pub write_buffer_size: usize,
    /// Longest a single peer write may take before that peer is disconnected.
    pub write_timeout: Duration,
    pub path: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 1024,
            write_timeout: Duration::from_secs(5),
            path: DEFAULT_PATH.to_string(),
        }
    }
}
