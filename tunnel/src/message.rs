use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `Micro-Tunnel` wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMessageType {
    Connect,
    Close,
    KeepAlive,
    Message,
}

/// The typed wire envelope. Field names mirror the `Micro-Tunnel*` headers
/// from the protocol this crate multiplexes; everything past `body` is opaque
/// to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelMessage {
    #[serde(rename = "type")]
    pub ty: TunnelMessageType,
    /// `Micro-Tunnel-Id`: sender's tunnel id.
    pub tunnel_id: Uuid,
    /// `Micro-Tunnel-Channel`, present on `Message`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channel: Option<String>,
    /// `Micro-Tunnel-Session`, present on `Message`. `"listener"` is reserved
    /// for the channel's listener-side session.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session: Option<String>,
    /// `Micro-Tunnel-Token`.
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

/// The reserved wire session id for a channel's listener-side session.
pub const LISTENER_SESSION_ID: &str = "listener";
