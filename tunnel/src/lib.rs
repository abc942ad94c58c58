//! Session-multiplexed, authenticated peer tunnel.
//!
//! A [`Tunnel`] dials and accepts connections to peers ([`Link`]s), and
//! multiplexes logical streams ([`Session`]s) over them by channel name. The
//! byte transport itself is out of scope: implement [`Transport`] against
//! whatever framing you use.

pub mod config;
pub mod error;
pub mod link;
pub mod message;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::Error;
pub use link::Link;
pub use message::{TunnelMessage, TunnelMessageType};
pub use session::{Session, SessionKey};
pub use transport::{Listener as TransportListener, Socket, Transport};
pub use tunnel::{Tunnel, TunnelBuilder};
pub use session::Listener;
