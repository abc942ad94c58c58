use thiserror::Error;

/// Errors surfaced by the network overlay driver.
///
/// As with [`tunnel::Error`], background tasks (resolve, announce, prune,
/// the two demux tasks, advertise) never propagate these out of the task —
/// they log and continue. `Network::connect`/`Network::close` return them
/// directly to their caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tunnel(#[from] tunnel::Error),

    #[error("malformed control payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("router error: {0}")]
    Router(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("resolver error: {0}")]
    Resolve(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
