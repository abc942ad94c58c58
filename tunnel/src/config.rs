use std::time::Duration;

/// Timer defaults for a [`crate::Tunnel`].
///
/// Constructed by the embedding binary and passed in; this crate never reads
/// environment variables or parses flags itself.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// How often a connected link sends a keepalive.
    pub keep_alive: Duration,
    /// How often the reconnect monitor retries configured nodes missing a link.
    pub reconnect: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            reconnect: Duration::from_secs(5),
        }
    }
}
