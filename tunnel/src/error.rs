use thiserror::Error;

/// Errors surfaced by the [`crate::Tunnel`] and its sessions.
///
/// Background tasks (fan-out, keepalive, reconnect monitor, per-link recv)
/// never propagate these: they log and continue. Per-message errors are
/// delivered back to the caller of [`crate::Session::send`] via the
/// message's own reply channel; everything else returns from a public
/// method call directly.
#[derive(Debug, Error)]
pub enum Error {
    #[error("link not connected")]
    LinkNotConnected,

    #[error("link is loopback")]
    LinkIsLoopback,

    #[error("link is not loopback")]
    LinkIsNotLoopback,

    #[error("link not found")]
    LinkNotFound,

    #[error("no link accepted the message")]
    NoLinkAccepted,

    #[error("token mismatch")]
    TokenMismatch,

    #[error("session already exists for this channel")]
    DuplicateSession,

    #[error("already listening on this channel")]
    AlreadyListening,

    #[error("session is closed")]
    SessionClosed,

    #[error("tunnel is closed")]
    TunnelClosed,

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("failed to bind listener: {0}")]
    Listen(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
