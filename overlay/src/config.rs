use std::time::Duration;

/// Timer defaults for the network overlay driver: resolve/announce/prune
/// periods are configurable, with the defaults below.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub resolve: Duration,
    pub announce: Duration,
    pub prune: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            resolve: Duration::from_secs(60),
            announce: Duration::from_secs(15),
            prune: Duration::from_secs(90),
        }
    }
}
